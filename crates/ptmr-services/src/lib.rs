//! ptmr Services Layer
//!
//! Clients for the eventually consistent collaborators the worker keeps in sync
//! with the relational store: the search index and outgoing email. Each comes
//! with an in-memory stand-in implementing the same trait.

pub mod mail;
pub mod search;

pub use mail::{
    DisabledEmailSender, EmailSender, MailError, OutgoingEmail, RecordingEmailSender,
    SmtpEmailSender,
};
pub use search::{
    DocumentStore, DocumentVersion, ElasticsearchClient, InMemoryDocumentStore, SearchError,
    VersionedDocument, CANDIDATE_APPLICATIONS_INDEX, CANDIDATES_INDEX, EMPLOYER_APPLICATIONS_INDEX,
};
