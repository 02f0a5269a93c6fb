use conceptnote_core::db::open_db_in_memory;
use conceptnote_core::{
    CodecConfig, DocumentId, DocumentRepository, ExplanationMode, GenerationError, RepoError,
    SqliteDocumentRepository,
};
use std::cell::RefCell;
use tempfile::TempDir;

fn echo(concept: &str, occurrence: u32, mode: ExplanationMode) -> Result<String, GenerationError> {
    Ok(format!("{concept}#{occurrence} ({})", mode.as_str()))
}

fn failing(_: &str, _: u32, _: ExplanationMode) -> Result<String, GenerationError> {
    Err(GenerationError("model unavailable".to_string()))
}

fn doc() -> DocumentId {
    DocumentId::new("u1", "notes.html")
}

#[test]
fn missing_document_loads_as_none() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDocumentRepository::new(&conn, echo);

    assert_eq!(repo.load_document(&doc()).unwrap(), None);
    assert!(repo.fetch_explanations(&doc()).unwrap().is_empty());
}

#[test]
fn persist_upserts_markup_verbatim() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDocumentRepository::new(&conn, echo);

    repo.persist_document(&doc(), "<p>first</p>").unwrap();
    repo.persist_document(&doc(), "<p>A <Concept><t1>B</t1></Concept> C</p>")
        .unwrap();

    assert_eq!(
        repo.load_document(&doc()).unwrap().as_deref(),
        Some("<p>A <Concept><t1>B</t1></Concept> C</p>")
    );
    let other = DocumentId::new("u2", "notes.html");
    assert_eq!(repo.load_document(&other).unwrap(), None);
}

#[test]
fn request_explanation_mints_tag_and_stores_row() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDocumentRepository::new(&conn, echo);
    repo.persist_document(&doc(), "<p>cat and cat</p>").unwrap();

    let generated = repo
        .request_explanation(&doc(), "cat", 2, ExplanationMode::Detailed)
        .unwrap();
    assert_eq!(generated.explanation, "cat#2 (detailed)");
    assert_eq!(generated.tag.as_str().len(), 32);
    assert!(generated
        .tag
        .as_str()
        .chars()
        .all(|c| c.is_ascii_hexdigit()));

    let stored = repo.fetch_explanations(&doc()).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].tag, generated.tag);
    assert_eq!(stored[0].concept, "cat");
    assert_eq!(stored[0].explanation, "cat#2 (detailed)");

    let (occurrence, mode): (u32, String) = conn
        .query_row(
            "SELECT occurrence, mode FROM concept_explanations WHERE tag = ?1;",
            [generated.tag.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(occurrence, 2);
    assert_eq!(mode, "detailed");
}

#[test]
fn explanations_come_back_oldest_first_per_document() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDocumentRepository::new(&conn, echo);
    let other = DocumentId::new("u1", "other.html");
    repo.persist_document(&doc(), "<p>a b</p>").unwrap();
    repo.persist_document(&other, "<p>c</p>").unwrap();

    let first = repo
        .request_explanation(&doc(), "a", 1, ExplanationMode::Fast)
        .unwrap();
    repo.request_explanation(&other, "c", 1, ExplanationMode::Fast)
        .unwrap();
    let second = repo
        .request_explanation(&doc(), "b", 1, ExplanationMode::Fast)
        .unwrap();

    let tags: Vec<_> = repo
        .fetch_explanations(&doc())
        .unwrap()
        .into_iter()
        .map(|stored| stored.tag)
        .collect();
    assert_eq!(tags, vec![first.tag, second.tag]);
}

#[test]
fn request_for_unknown_document_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDocumentRepository::new(&conn, echo);

    let err = repo
        .request_explanation(&doc(), "cat", 1, ExplanationMode::Fast)
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound(id) if id == doc()));
}

#[test]
fn invalid_requests_are_rejected_before_generation() {
    let conn = open_db_in_memory().unwrap();
    let calls = RefCell::new(0);
    let counting = |concept: &str, occurrence: u32, mode: ExplanationMode| {
        *calls.borrow_mut() += 1;
        echo(concept, occurrence, mode)
    };
    let repo = SqliteDocumentRepository::new(&conn, counting);
    repo.persist_document(&doc(), "<p>x</p>").unwrap();

    assert!(matches!(
        repo.request_explanation(&doc(), "  ", 1, ExplanationMode::Fast),
        Err(RepoError::InvalidRequest(_))
    ));
    assert!(matches!(
        repo.request_explanation(&doc(), "x", 0, ExplanationMode::Fast),
        Err(RepoError::InvalidRequest(_))
    ));
    assert_eq!(*calls.borrow(), 0);
}

#[test]
fn generator_failure_stores_nothing() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDocumentRepository::new(&conn, failing);
    repo.persist_document(&doc(), "<p>x</p>").unwrap();

    let err = repo
        .request_explanation(&doc(), "x", 1, ExplanationMode::Fast)
        .unwrap_err();
    assert!(matches!(err, RepoError::Generation(_)));
    assert!(repo.fetch_explanations(&doc()).unwrap().is_empty());
}

#[test]
fn corrupt_explanation_tag_is_invalid_data() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDocumentRepository::new(&conn, echo);
    conn.execute(
        "INSERT INTO concept_explanations
            (user_id, filename, tag, concept, explanation)
         VALUES ('u1', 'notes.html', 'bad tag', 'c', 'e');",
        [],
    )
    .unwrap();

    assert!(matches!(
        repo.fetch_explanations(&doc()),
        Err(RepoError::InvalidData(_))
    ));
}

#[test]
fn documents_survive_reopening_the_configured_database() {
    let temp_dir = TempDir::new().unwrap();
    let config = CodecConfig {
        database_path: temp_dir.path().join("notes.sqlite3"),
        ..CodecConfig::default()
    };

    {
        let conn = config.open_database().unwrap();
        let repo = SqliteDocumentRepository::new(&conn, echo);
        repo.persist_document(&doc(), "<p>A <Concept><t1>B</t1></Concept></p>")
            .unwrap();
        repo.request_explanation(&doc(), "B", 1, ExplanationMode::Fast)
            .unwrap();
    }

    let conn = config.open_database().unwrap();
    let repo = SqliteDocumentRepository::new(&conn, echo);
    assert_eq!(
        repo.load_document(&doc()).unwrap().as_deref(),
        Some("<p>A <Concept><t1>B</t1></Concept></p>")
    );
    assert_eq!(repo.fetch_explanations(&doc()).unwrap().len(), 1);
}
