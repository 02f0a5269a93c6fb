//! Command-line front end for the concept codec.
//!
//! # Responsibility
//! - `decode <file>`: print the de-tagged body, annotations and issues as JSON.
//! - `roundtrip <file>`: decode, build a tree, place marks, encode, print.
//! - `import <user> <name> <file>`: store markup in the configured database.
//! - `export <user> <name>`: print stored markup from the configured database.
//! - Keep output deterministic for quick local checks.

use conceptnote_core::{
    apply_annotation_marks, core_version, decode, encode, init_logging_from_config,
    AnnotationStore, CodecConfig, DocTree, DocumentId, DocumentRepository, ExplanationMode,
    GenerationError, SqliteDocumentRepository,
};
use log::info;
use std::path::Path;
use std::process::ExitCode;

const CONFIG_ENV: &str = "CONCEPTNOTE_CONFIG";
const USAGE: &str = "usage: conceptnote <decode|roundtrip> <file>\n       conceptnote import <user> <name> <file>\n       conceptnote export <user> <name>";

fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.as_slice() {
        [command, file] if command == "decode" => run_decode(Path::new(file)),
        [command, file] if command == "roundtrip" => run_roundtrip(Path::new(file), &config),
        [command, user, name, file] if command == "import" => {
            run_import(&DocumentId::new(user.as_str(), name.as_str()), Path::new(file), &config)
        }
        [command, user, name] if command == "export" => {
            run_export(&DocumentId::new(user.as_str(), name.as_str()), &config)
        }
        [] => {
            println!("conceptnote_core version={}", core_version());
            println!("{USAGE}");
            Ok(())
        }
        _ => Err(USAGE.to_string()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn load_config() -> Result<CodecConfig, String> {
    let Some(path) = std::env::var_os(CONFIG_ENV) else {
        return Ok(CodecConfig::default());
    };
    let config = CodecConfig::load_or_default(&path).map_err(|err| err.to_string())?;
    init_logging_from_config(&config).map_err(|err| err.to_string())?;
    Ok(config)
}

fn read_markup(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|err| format!("failed to read {}: {err}", path.display()))
}

fn run_decode(path: &Path) -> Result<(), String> {
    let decoded = decode(&read_markup(path)?);
    let issues: Vec<String> = decoded.issues.iter().map(ToString::to_string).collect();
    let output = serde_json::json!({
        "body": decoded.body,
        "annotations": decoded.annotations,
        "issues": issues,
    });
    let rendered = serde_json::to_string_pretty(&output).map_err(|err| err.to_string())?;
    println!("{rendered}");
    Ok(())
}

fn run_roundtrip(path: &Path, config: &CodecConfig) -> Result<(), String> {
    let decoded = decode(&read_markup(path)?);
    let mut tree = DocTree::parse(&decoded.body).with_concept_class(config.concept_class.clone());
    let mut store = AnnotationStore::new();
    for annotation in &decoded.annotations {
        store.insert(annotation.clone()).map_err(|err| err.to_string())?;
    }
    let mapping = apply_annotation_marks(&mut tree, &decoded.annotations);
    let encoded = encode(&tree, &store);

    info!(
        "event=cli_roundtrip module=cli status=ok annotations={} skipped={} missing={}",
        store.len(),
        mapping.skipped.len(),
        encoded.missing.len()
    );
    for (tag, reason) in &mapping.skipped {
        eprintln!("skipped {tag}: {reason}");
    }
    for issue in &decoded.issues {
        eprintln!("issue: {issue}");
    }
    println!("{}", encoded.markup);
    Ok(())
}

fn no_generator(_: &str, _: u32, _: ExplanationMode) -> Result<String, GenerationError> {
    Err(GenerationError(
        "no explanation generator is available from the command line".to_string(),
    ))
}

fn run_import(id: &DocumentId, path: &Path, config: &CodecConfig) -> Result<(), String> {
    let markup = read_markup(path)?;
    let decoded = decode(&markup);
    for issue in &decoded.issues {
        eprintln!("issue: {issue}");
    }

    let conn = config.open_database().map_err(|err| err.to_string())?;
    let repo = SqliteDocumentRepository::new(&conn, no_generator);
    repo.persist_document(id, &markup)
        .map_err(|err| err.to_string())?;
    info!(
        "event=cli_import module=cli status=ok document={id} annotations={} issues={}",
        decoded.annotations.len(),
        decoded.issues.len()
    );
    println!(
        "stored {id} in {} ({} concepts)",
        config.database_path.display(),
        decoded.annotations.len()
    );
    Ok(())
}

fn run_export(id: &DocumentId, config: &CodecConfig) -> Result<(), String> {
    let conn = config.open_database().map_err(|err| err.to_string())?;
    let repo = SqliteDocumentRepository::new(&conn, no_generator);
    let markup = repo
        .load_document(id)
        .map_err(|err| err.to_string())?
        .ok_or_else(|| format!("document not found: {id}"))?;
    println!("{markup}");
    Ok(())
}
