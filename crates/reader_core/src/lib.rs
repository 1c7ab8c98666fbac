pub mod chapter_index;
pub mod domain;
pub mod entitlement;
pub mod pagination;
pub mod ports;
pub mod reader;
pub mod session;

pub use chapter_index::ChapterIndex;
pub use domain::{
    page_label, Book, BookId, Bookmark, BookmarkId, Chapter, DomainError, Entitlement,
    ReadingProgress, UserId,
};
pub use entitlement::{AccessDecision, EntitlementGate, PurchaseOutcome};
pub use pagination::{PageBounds, PageResult, PaginationController};
pub use ports::{DatabaseService, InsertOutcome, PortError, PortResult};
pub use reader::{
    LiveSession, OpenOptions, OpenOutcome, ReaderService, ReaderSettings, SaveStatus,
    SessionError, SessionSnapshot, ToggleReport,
};
pub use session::{ReadingSession, ToggleOutcome};
