//! Persisted Variables Inspector
//!
//! Prints the content of a persisted-variables file. An interrupted flush is
//! completed first, exactly as server startup would. Sealed sensitive
//! content is reported but never decrypted.
//!
//! ## Usage
//!
//! ```text
//! persisted-vars-inspect [DATA_DIR]
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | PERSIST_DATA_DIR | . | Directory holding the file (overridden by DATA_DIR) |
//! | PERSIST_FILE_NAME | mysqld-auto.cnf | Primary file name |
//! | PERSIST_LOG | info | Log filter |
//! | PERSIST_LOG_JSON | false | JSON log output |

use persisted_vars::codec::document::{
    DYNAMIC_PARSE_EARLY, DYNAMIC_VARIABLES, SENSITIVE, SENSITIVE_DYNAMIC, SENSITIVE_STATIC,
    STATIC_PARSE_EARLY, STATIC_VARIABLES, V1_SERVER,
};
use persisted_vars::codec::{self, Document, Section};
use persisted_vars::observability::{self, LogConfig};
use persisted_vars::storage::{DurableFile, LocalFileStore};
use persisted_vars::{PersistConfig, PersistError};

fn print_section(title: &str, section: &Section, mask: bool) {
    println!("{} ({})", title, section.len());
    for record in section.values() {
        let value = match record.value_opt() {
            _ if mask => "****".to_string(),
            Some(v) => format!("\"{}\"", v),
            None => "NULL".to_string(),
        };
        println!(
            "  {:<40} {:<24} ts={} {}@{}",
            record.name, value, record.timestamp, record.user, record.host
        );
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    observability::init_tracing(&LogConfig::from_env())?;

    let mut config = PersistConfig::from_env();
    if let Some(dir) = std::env::args().nth(1) {
        config.data_dir = dir.into();
    }
    config.validate()?;

    let store = LocalFileStore::new(&config.data_dir)?;
    let file = DurableFile::new(store, config.file_name.clone());
    let loaded = file.load(|bytes| codec::parse(bytes).map_err(PersistError::from))?;

    println!("Persisted Variables Inspector");
    println!("=============================");
    println!("File: {}", config.primary_path().display());

    let Some(loaded) = loaded else {
        println!("No persisted variables file.");
        return Ok(());
    };
    if loaded.recovered_from_shadow {
        println!("Recovered an interrupted flush from the shadow file.");
    }
    println!("Version: {}", loaded.value.version());
    println!();

    match loaded.value {
        Document::V1(v1) => {
            print_section(V1_SERVER, &v1.records, false);
            println!();
            println!("Will be rewritten as version {} on the next flush.", codec::CURRENT_VERSION);
        }
        Document::V2(v2) => {
            print_section(STATIC_PARSE_EARLY, &v2.static_parse_early, false);
            print_section(DYNAMIC_PARSE_EARLY, &v2.dynamic_parse_early, false);
            print_section(STATIC_VARIABLES, &v2.static_vars, false);
            print_section(DYNAMIC_VARIABLES, &v2.dynamic_vars, false);

            if let Some(sensitive) = &v2.sensitive {
                println!();
                println!("{}", SENSITIVE);
                if let Some(material) = &sensitive.key_material {
                    println!("  master_key_id: {}", material.master_key_id);
                    println!("  key algorithm: {}", material.key_encryption_algorithm);
                    println!("  data algorithm: {}", material.data_encryption_algorithm);
                }
                if let Some(sealed) = &sensitive.sealed {
                    println!("  sealed blob: {} bytes (not decrypted)", sealed.ciphertext.len() / 2);
                }
                if let Some(plaintext) = &sensitive.plaintext {
                    println!("  WARNING: plaintext fallback sections present");
                    print_section(&format!("  {}", SENSITIVE_STATIC), &plaintext.static_vars, true);
                    print_section(&format!("  {}", SENSITIVE_DYNAMIC), &plaintext.dynamic_vars, true);
                }
            }
        }
    }

    Ok(())
}
