//! Synthetic dataset generation for demonstration mode.
//!
//! The tables produced here are fictitious and exist only so the dashboard
//! can be exercised without reaching the national systems. Entries built
//! from them are tagged [`DataSource::Synthetic`] and must never be shown
//! without that flag.
//!
//! Generation is deterministic per (system, year): the same pair always
//! yields the same table, which keeps demo caches reproducible.
//!
//! [`DataSource::Synthetic`]: crate::models::DataSource::Synthetic

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::{DataTable, HealthSystem, Value};
use crate::settings::Municipality;

/// Bounds for the number of synthetic records per dataset.
const MIN_RECORDS: usize = 50;
const MAX_RECORDS: usize = 500;

/// Notifiable diseases sampled for synthetic notification tables.
const DISEASES: [&str; 8] = [
    "DENGUE",
    "CHIKUNGUNYA",
    "ZIKA",
    "TUBERCULOSE",
    "HANSENIASE",
    "LEISHMANIOSE",
    "SIFILIS",
    "HEPATITES_VIRAIS",
];

/// ICD-10 chapter ranges sampled for synthetic underlying causes of death.
const CAUSE_GROUPS: [&str; 8] = [
    "A00-B99", "C00-D48", "E00-E90", "F00-F99", "G00-G99", "I00-I99", "J00-J99", "V01-Y98",
];

/// Generate a synthetic dataset for one (system, year) partition.
pub fn generate(system: HealthSystem, municipality: &Municipality, year: i32) -> DataTable {
    let mut rng = StdRng::seed_from_u64(seed_for(system, year));
    let records = rng.gen_range(MIN_RECORDS..=MAX_RECORDS);

    let mut table = match system {
        HealthSystem::Sim => mortality_table(&mut rng, year, records),
        HealthSystem::Sinan => notification_table(&mut rng, year, records),
        HealthSystem::Sinasc => birth_table(&mut rng, year, records),
    };

    // The real extracts carry the municipality on every row
    table.push_constant_column(
        "codigo_municipio",
        Value::Int(i64::from(municipality.ibge_code)),
    );
    table.push_constant_column("municipio", Value::Text(municipality.name.clone()));
    table.push_constant_column("uf", Value::Text(municipality.uf.clone()));
    table
}

fn seed_for(system: HealthSystem, year: i32) -> u64 {
    let tag = match system {
        HealthSystem::Sim => 1u64,
        HealthSystem::Sinan => 2,
        HealthSystem::Sinasc => 3,
    };
    ((year as u64) << 8) | tag
}

/// Inverse-CDF sample of an exponential distribution with the given mean,
/// clamped to a plausible age.
fn sample_age(rng: &mut StdRng, mean: f64, max: i64) -> i64 {
    let u: f64 = rng.gen_range(f64::EPSILON..1.0);
    ((-mean * u.ln()) as i64).min(max)
}

fn sex(rng: &mut StdRng) -> Value {
    Value::Text(if rng.gen_bool(0.5) { "M" } else { "F" }.to_string())
}

fn race(rng: &mut StdRng) -> Value {
    // Census categories, "parda" and "branca" dominating as in the region
    let code = *pick(rng, &["1", "1", "2", "4", "4", "4", "5"]);
    Value::Text(code.to_string())
}

fn schooling(rng: &mut StdRng) -> Value {
    Value::Text(pick(rng, &["1", "2", "3", "4", "5", "9"]).to_string())
}

fn pick<'a, T>(rng: &mut StdRng, items: &'a [T]) -> &'a T {
    &items[rng.gen_range(0..items.len())]
}

fn mortality_table(rng: &mut StdRng, year: i32, records: usize) -> DataTable {
    let columns = [
        "ano",
        "mes",
        "sexo",
        "idade",
        "raca_cor",
        "escolaridade",
        "estado_civil",
        "causa_basica",
        "local_obito",
    ];
    let rows = (0..records)
        .map(|_| {
            vec![
                Value::Int(i64::from(year)),
                Value::Int(rng.gen_range(1..=12)),
                sex(rng),
                Value::Int(sample_age(rng, 45.0, 110)),
                race(rng),
                schooling(rng),
                Value::Text(pick(rng, &["1", "2", "3", "4", "5", "9"]).to_string()),
                Value::Text(pick(rng, &CAUSE_GROUPS).to_string()),
                Value::Int(rng.gen_range(1..=5)),
            ]
        })
        .collect();
    DataTable::from_rows_unchecked(columns.iter().map(|c| c.to_string()).collect(), rows)
}

fn notification_table(rng: &mut StdRng, year: i32, records: usize) -> DataTable {
    let columns = [
        "ano",
        "mes",
        "semana_notificacao",
        "sexo",
        "idade",
        "raca_cor",
        "escolaridade",
        "doenca",
        "evolucao",
    ];
    let rows = (0..records)
        .map(|_| {
            vec![
                Value::Int(i64::from(year)),
                Value::Int(rng.gen_range(1..=12)),
                Value::Int(rng.gen_range(1..=52)),
                sex(rng),
                Value::Int(sample_age(rng, 35.0, 100)),
                race(rng),
                schooling(rng),
                Value::Text(pick(rng, &DISEASES).to_string()),
                Value::Text(pick(rng, &["1", "1", "1", "2", "9"]).to_string()),
            ]
        })
        .collect();
    DataTable::from_rows_unchecked(columns.iter().map(|c| c.to_string()).collect(), rows)
}

fn birth_table(rng: &mut StdRng, year: i32, records: usize) -> DataTable {
    let columns = [
        "ano",
        "mes",
        "sexo",
        "peso",
        "gestacao_semanas",
        "idade_mae",
        "consultas_pre_natal",
        "tipo_parto",
        "apgar_5",
    ];
    let rows = (0..records)
        .map(|_| {
            vec![
                Value::Int(i64::from(year)),
                Value::Int(rng.gen_range(1..=12)),
                sex(rng),
                Value::Int(rng.gen_range(2200..=4400)),
                Value::Int(rng.gen_range(34..=42)),
                Value::Int(rng.gen_range(15..=45)),
                Value::Int(rng.gen_range(1..=9)),
                Value::Text(pick(rng, &["1", "1", "2", "2", "9"]).to_string()),
                Value::Int(rng.gen_range(6..=10)),
            ]
        })
        .collect();
    DataTable::from_rows_unchecked(columns.iter().map(|c| c.to_string()).collect(), rows)
}
