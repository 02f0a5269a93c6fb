//! Concept session use cases: load, explain, save.
//!
//! # Responsibility
//! - Own the annotation store and document tree of one open document.
//! - Sequence the codec steps around repository calls.
//! - Serialize saves and keep explanation requests from overlapping.
//!
//! # Invariants
//! - A failed load leaves the session state untouched.
//! - A failed save never mutates the store; missing tags are pruned only
//!   after the document was persisted.
//! - At most one in-flight explanation request covers any tree position.
//! - Tags come from the repository, never from the session.

use crate::codec::extractor::{decode, DecodeIssue};
use crate::codec::mapper::{apply_annotation_marks, logical_offset_at, MappingReport};
use crate::codec::offset::{LogicalOffset, TreeOffset};
use crate::codec::serializer::encode;
use crate::codec::tree::ConceptTree;
use crate::config::CodecConfig;
use crate::model::annotation::{Annotation, ConceptTag};
use crate::model::doc_tree::{DocTree, DEFAULT_CONCEPT_CLASS};
use crate::model::explanation::{DocumentId, ExplanationMode, GeneratedExplanation};
use crate::repo::document_repo::{DocumentRepository, RepoError};
use crate::store::{AnnotationStore, StoreError};
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Session-level failures.
#[derive(Debug)]
pub enum SessionError {
    DocumentNotFound(DocumentId),
    Repo(RepoError),
    Store(StoreError),
    EmptySelection,
    SelectionOutOfRange {
        end: TreeOffset,
        size: TreeOffset,
    },
    /// Another explanation request covers part of the selection.
    RequestInFlight,
    /// The selection already carries this concept.
    AlreadyAnnotated(ConceptTag),
    UnknownTicket(u64),
    SaveInProgress,
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DocumentNotFound(id) => write!(f, "document not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::EmptySelection => write!(f, "selection holds no text"),
            Self::SelectionOutOfRange { end, size } => {
                write!(f, "selection ends at {end} past document size {size}")
            }
            Self::RequestInFlight => {
                write!(f, "an explanation request already covers this selection")
            }
            Self::AlreadyAnnotated(tag) => write!(f, "selection overlaps concept `{tag}`"),
            Self::UnknownTicket(id) => write!(f, "explanation ticket {id} is not in flight"),
            Self::SaveInProgress => write!(f, "a save is already in progress"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for SessionError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<StoreError> for SessionError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Outcome of `ConceptSession::load`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub annotations: usize,
    pub issues: Vec<DecodeIssue>,
    pub mapping: MappingReport,
    pub explanations_merged: usize,
}

/// Outcome of a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    /// Markup handed to the repository.
    pub markup: String,
    /// Tags dropped from the store because their marks are gone.
    pub pruned: Vec<ConceptTag>,
}

/// Reservation for one explanation request.
///
/// Not `Clone`: a ticket is completed or abandoned exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct ExplanationTicket {
    id: u64,
    selection: Range<TreeOffset>,
    text: String,
    occurrence: u32,
    from: LogicalOffset,
    to: LogicalOffset,
}

impl ExplanationTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn selection(&self) -> Range<TreeOffset> {
        self.selection.clone()
    }

    /// Selected text, leaf boundaries ignored.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// 1-based rank of this appearance of `text` in the document.
    pub fn occurrence(&self) -> u32 {
        self.occurrence
    }
}

/// Single outstanding-save flag, shareable between handles of one document.
#[derive(Debug, Clone, Default)]
pub struct SaveGuard {
    busy: Arc<AtomicBool>,
}

/// Held while a save runs; releases the guard on drop.
#[derive(Debug)]
pub struct SaveTicket {
    busy: Arc<AtomicBool>,
}

impl SaveGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the guard, or `None` while another save holds it.
    pub fn try_acquire(&self) -> Option<SaveTicket> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SaveTicket {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for SaveTicket {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Fixed-interval autosave schedule driven by the caller's clock.
#[derive(Debug, Clone)]
pub struct AutosaveTimer {
    interval: Duration,
    last_save: Instant,
    requested: bool,
}

impl AutosaveTimer {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_save: now,
            requested: false,
        }
    }

    pub fn from_config(config: &CodecConfig, now: Instant) -> Self {
        Self::new(config.autosave_interval(), now)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a save should run at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.requested || now.saturating_duration_since(self.last_save) >= self.interval
    }

    /// Asks for a save at the next check regardless of the interval.
    pub fn request_save(&mut self) {
        self.requested = true;
    }

    pub fn record_save(&mut self, now: Instant) {
        self.last_save = now;
        self.requested = false;
    }
}

/// One open document: its tree, its annotation store, its collaborators.
pub struct ConceptSession<R: DocumentRepository> {
    document: DocumentId,
    repo: R,
    mode: ExplanationMode,
    concept_class: String,
    store: AnnotationStore,
    tree: DocTree,
    in_flight: Vec<(u64, Range<TreeOffset>)>,
    next_ticket: u64,
    save_guard: SaveGuard,
}

impl<R: DocumentRepository> ConceptSession<R> {
    /// Creates an empty session; call `load` to read the document.
    pub fn new(document: DocumentId, repo: R) -> Self {
        Self {
            document,
            repo,
            mode: ExplanationMode::default(),
            concept_class: DEFAULT_CONCEPT_CLASS.to_string(),
            store: AnnotationStore::new(),
            tree: DocTree::default(),
            in_flight: Vec::new(),
            next_ticket: 1,
            save_guard: SaveGuard::new(),
        }
    }

    /// Creates a session using the config's mode and concept class.
    pub fn with_config(document: DocumentId, repo: R, config: &CodecConfig) -> Self {
        let mut session = Self::new(document, repo);
        session.mode = config.explanation_mode;
        session.concept_class = config.concept_class.clone();
        session.tree = DocTree::default().with_concept_class(session.concept_class.clone());
        session
    }

    /// Shares `guard` so saves from other handles of this document serialize
    /// with this session's saves.
    pub fn with_save_guard(mut self, guard: SaveGuard) -> Self {
        self.save_guard = guard;
        self
    }

    pub fn document(&self) -> &DocumentId {
        &self.document
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn tree(&self) -> &DocTree {
        &self.tree
    }

    /// Editor access to the tree. Edits invalidate stored offsets.
    pub fn tree_mut(&mut self) -> &mut DocTree {
        &mut self.tree
    }

    pub fn save_guard(&self) -> SaveGuard {
        self.save_guard.clone()
    }

    pub fn explanation_mode(&self) -> ExplanationMode {
        self.mode
    }

    /// Annotations in creation order.
    pub fn concepts(&self) -> impl Iterator<Item = &Annotation> {
        self.store.iter()
    }

    /// Loads the document: decode, build the tree, place marks, then join
    /// stored explanations.
    ///
    /// # Errors
    /// - `DocumentNotFound` when the repository has no such document.
    /// - `Repo` when loading fails. The session is untouched either way.
    ///
    /// A failed explanation fetch is logged and the load still succeeds.
    pub fn load(&mut self) -> Result<LoadReport, SessionError> {
        let markup = match self.repo.load_document(&self.document) {
            Ok(Some(markup)) => markup,
            Ok(None) => {
                warn!("event=session_load module=service status=not_found");
                return Err(SessionError::DocumentNotFound(self.document.clone()));
            }
            Err(err) => {
                error!("event=session_load module=service status=error error=\"{err}\"");
                return Err(err.into());
            }
        };

        let decoded = decode(&markup);
        let mut tree =
            DocTree::parse(&decoded.body).with_concept_class(self.concept_class.clone());
        let mut store = AnnotationStore::new();
        for annotation in &decoded.annotations {
            store.insert(annotation.clone())?;
        }
        let mapping = apply_annotation_marks(&mut tree, &decoded.annotations);

        let explanations_merged = match self.repo.fetch_explanations(&self.document) {
            Ok(explanations) => store.apply_explanations(&explanations),
            Err(err) => {
                warn!(
                    "event=session_load module=service status=degraded step=fetch_explanations error=\"{err}\""
                );
                0
            }
        };

        self.tree = tree;
        self.store = store;
        self.in_flight.clear();

        let report = LoadReport {
            annotations: decoded.annotations.len(),
            issues: decoded.issues,
            mapping,
            explanations_merged,
        };
        info!(
            "event=session_load module=service status=ok annotations={} issues={} applied={} skipped={} explained={}",
            report.annotations,
            report.issues.len(),
            report.mapping.applied,
            report.mapping.skipped.len(),
            report.explanations_merged
        );
        Ok(report)
    }

    /// Reserves `selection` for an explanation request and marks it with a
    /// tag-less placeholder.
    ///
    /// # Errors
    /// - `EmptySelection` for an empty range or whitespace-only text.
    /// - `SelectionOutOfRange` past the document end.
    /// - `RequestInFlight` when another reservation overlaps.
    /// - `AlreadyAnnotated` when the range carries a concept already.
    pub fn begin_explanation(
        &mut self,
        selection: Range<TreeOffset>,
    ) -> Result<ExplanationTicket, SessionError> {
        if selection.start >= selection.end {
            return Err(SessionError::EmptySelection);
        }
        let size = self.tree.content_size();
        if selection.end > size {
            return Err(SessionError::SelectionOutOfRange {
                end: selection.end,
                size,
            });
        }
        if self
            .in_flight
            .iter()
            .any(|(_, reserved)| reserved.start < selection.end && selection.start < reserved.end)
        {
            return Err(SessionError::RequestInFlight);
        }
        if let Some(tag) = (selection.start.get()..selection.end.get())
            .find_map(|pos| self.tree.concept_tag_at(TreeOffset(pos)))
        {
            return Err(SessionError::AlreadyAnnotated(tag));
        }

        let text = self.tree.text_between(selection.clone());
        if text.trim().is_empty() {
            return Err(SessionError::EmptySelection);
        }
        let (Some(from), Some(to)) = (
            logical_offset_at(&self.tree, selection.start),
            logical_offset_at(&self.tree, selection.end),
        ) else {
            return Err(SessionError::SelectionOutOfRange {
                end: selection.end,
                size,
            });
        };
        let occurrence = occurrence_at(&self.tree.plain_text(), &text, from);

        self.tree.set_concept_mark(selection.clone(), None);
        let id = self.next_ticket;
        self.next_ticket += 1;
        self.in_flight.push((id, selection.clone()));
        info!(
            "event=explanation_begin module=service status=ok ticket={id} from={from} to={to} occurrence={occurrence}"
        );

        Ok(ExplanationTicket {
            id,
            selection,
            text,
            occurrence,
            from,
            to,
        })
    }

    /// Stores the generated explanation and replaces the placeholder with
    /// the issued tag.
    ///
    /// # Errors
    /// - `UnknownTicket` when the ticket was already released.
    /// - `Store` when the issued tag is already known; the placeholder is
    ///   removed and the store left as it was.
    pub fn complete_explanation(
        &mut self,
        ticket: ExplanationTicket,
        response: GeneratedExplanation,
    ) -> Result<ConceptTag, SessionError> {
        self.release(&ticket)?;
        let tag = response.tag;
        let annotation = Annotation::new(tag.clone(), ticket.text, ticket.from, ticket.to)
            .with_explanation(response.explanation);
        if let Err(err) = self.store.insert(annotation) {
            self.tree.clear_placeholder_marks(ticket.selection);
            warn!(
                "event=explanation_complete module=service status=rejected ticket={} error=\"{err}\"",
                ticket.id
            );
            return Err(err.into());
        }
        self.tree.set_concept_mark(ticket.selection.clone(), Some(&tag));
        self.tree.set_selection(ticket.selection);
        info!(
            "event=explanation_complete module=service status=ok ticket={} tag={tag}",
            ticket.id
        );
        Ok(tag)
    }

    /// Releases the reservation and removes its placeholder mark.
    pub fn abandon_explanation(&mut self, ticket: ExplanationTicket) {
        if self.release(&ticket).is_ok() {
            self.tree.clear_placeholder_marks(ticket.selection);
            info!(
                "event=explanation_abandon module=service status=ok ticket={}",
                ticket.id
            );
        }
    }

    /// Runs begin, request and complete; abandons the ticket on failure.
    pub fn generate_explanation(
        &mut self,
        selection: Range<TreeOffset>,
    ) -> Result<ConceptTag, SessionError> {
        let ticket = self.begin_explanation(selection)?;
        match self.repo.request_explanation(
            &self.document,
            ticket.text(),
            ticket.occurrence(),
            self.mode,
        ) {
            Ok(response) => self.complete_explanation(ticket, response),
            Err(err) => {
                error!(
                    "event=explanation_request module=service status=error ticket={} error=\"{err}\"",
                    ticket.id
                );
                self.abandon_explanation(ticket);
                Err(err.into())
            }
        }
    }

    /// Encodes the tree and persists it.
    ///
    /// # Errors
    /// - `SaveInProgress` while another save holds the guard.
    /// - `Repo` when persisting fails; the store is not changed.
    pub fn save(&mut self) -> Result<SaveReport, SessionError> {
        let Some(_ticket) = self.save_guard.try_acquire() else {
            warn!("event=document_save module=service status=skipped reason=in_progress");
            return Err(SessionError::SaveInProgress);
        };

        let encoded = encode(&self.tree, &self.store);
        if let Err(err) = self.repo.persist_document(&self.document, &encoded.markup) {
            error!("event=document_save module=service status=error error=\"{err}\"");
            return Err(err.into());
        }

        self.store.prune(&encoded.missing);
        info!(
            "event=document_save module=service status=ok annotations={} pruned={}",
            self.store.len(),
            encoded.missing.len()
        );
        Ok(SaveReport {
            markup: encoded.markup,
            pruned: encoded.missing,
        })
    }

    /// Saves when `timer` is due. A save already in progress is not an
    /// error; the timer stays due and the next check retries.
    pub fn autosave(
        &mut self,
        timer: &mut AutosaveTimer,
        now: Instant,
    ) -> Result<Option<SaveReport>, SessionError> {
        if !timer.is_due(now) {
            return Ok(None);
        }
        match self.save() {
            Ok(report) => {
                timer.record_save(now);
                Ok(Some(report))
            }
            Err(SessionError::SaveInProgress) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// The annotation under `pos`, only when it has an explanation to show.
    pub fn concept_at(&self, pos: TreeOffset) -> Option<&Annotation> {
        let tag = self.tree.concept_tag_at(pos)?;
        self.store
            .get(&tag)
            .filter(|annotation| annotation.has_explanation())
    }

    fn release(&mut self, ticket: &ExplanationTicket) -> Result<(), SessionError> {
        let index = self
            .in_flight
            .iter()
            .position(|(id, _)| *id == ticket.id)
            .ok_or(SessionError::UnknownTicket(ticket.id))?;
        self.in_flight.remove(index);
        Ok(())
    }
}

/// 1-based rank of the appearance of `needle` that starts at or before
/// `from`; 1 when none is found.
fn occurrence_at(haystack: &str, needle: &str, from: LogicalOffset) -> u32 {
    if needle.is_empty() {
        return 1;
    }
    let count = haystack
        .match_indices(needle)
        .filter(|(byte, _)| haystack[..*byte].chars().count() <= from.get())
        .count();
    u32::try_from(count.max(1)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::{occurrence_at, AutosaveTimer, SaveGuard};
    use crate::codec::offset::LogicalOffset;
    use std::time::{Duration, Instant};

    #[test]
    fn occurrence_counts_earlier_appearances() {
        let text = "cat and cat and cat";
        assert_eq!(occurrence_at(text, "cat", LogicalOffset(0)), 1);
        assert_eq!(occurrence_at(text, "cat", LogicalOffset(8)), 2);
        assert_eq!(occurrence_at(text, "cat", LogicalOffset(16)), 3);
        assert_eq!(occurrence_at(text, "dog", LogicalOffset(3)), 1);
    }

    #[test]
    fn save_guard_admits_one_holder_at_a_time() {
        let guard = SaveGuard::new();
        let shared = guard.clone();
        let ticket = guard.try_acquire().unwrap();
        assert!(shared.is_busy());
        assert!(shared.try_acquire().is_none());
        drop(ticket);
        assert!(!guard.is_busy());
        assert!(shared.try_acquire().is_some());
    }

    #[test]
    fn autosave_timer_fires_on_interval_or_request() {
        let start = Instant::now();
        let mut timer = AutosaveTimer::new(Duration::from_secs(120), start);
        assert!(!timer.is_due(start + Duration::from_secs(119)));
        assert!(timer.is_due(start + Duration::from_secs(120)));

        timer.record_save(start + Duration::from_secs(120));
        assert!(!timer.is_due(start + Duration::from_secs(121)));
        timer.request_save();
        assert!(timer.is_due(start + Duration::from_secs(121)));
        timer.record_save(start + Duration::from_secs(122));
        assert!(!timer.is_due(start + Duration::from_secs(123)));
    }
}
