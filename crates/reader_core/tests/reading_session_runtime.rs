mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use reader_core::{
    EntitlementGate, LiveSession, OpenOptions, OpenOutcome, PageResult, PurchaseOutcome,
    ReaderService, SaveStatus, SessionError, ToggleOutcome,
};
use support::{fast_settings, FakeStore};
use uuid::Uuid;

async fn owned_book(store: &Arc<FakeStore>, total_pages: u32) -> (ReaderService, Uuid, Uuid) {
    let service = ReaderService::new(store.clone(), fast_settings());
    let book = store.add_book(total_pages, &[1, 21, 51]).await;
    let user = Uuid::new_v4();
    service
        .purchase(Some(user), book, 999, "USD")
        .await
        .expect("purchase");
    (service, user, book)
}

async fn open(
    service: &ReaderService,
    user: Option<Uuid>,
    book: Uuid,
    options: OpenOptions,
) -> Arc<LiveSession> {
    match service.open_session(user, book, options).await.expect("open") {
        OpenOutcome::Opened(session) => session,
        OpenOutcome::NotEntitled => panic!("not entitled"),
        OpenOutcome::Unauthenticated => panic!("unauthenticated"),
    }
}

//=========================================================================================
// Opening
//=========================================================================================

#[tokio::test]
async fn full_access_requires_a_signed_in_reader() {
    let store = FakeStore::new();
    let service = ReaderService::new(store.clone(), fast_settings());
    let book = store.add_book(10, &[]).await;

    let outcome = service
        .open_session(None, book, OpenOptions::default())
        .await
        .unwrap();

    assert!(matches!(outcome, OpenOutcome::Unauthenticated));
    assert_eq!(store.entitlement_lookups.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn reader_without_entitlement_is_sent_to_purchase() {
    let store = FakeStore::new();
    let service = ReaderService::new(store.clone(), fast_settings());
    let book = store.add_book(10, &[]).await;

    let outcome = service
        .open_session(Some(Uuid::new_v4()), book, OpenOptions::default())
        .await
        .unwrap();

    assert!(matches!(outcome, OpenOutcome::NotEntitled));
}

#[tokio::test]
async fn opening_records_the_first_page_as_read() {
    let store = FakeStore::new();
    let (service, user, book) = owned_book(&store, 100).await;

    let session = open(&service, Some(user), book, OpenOptions::default()).await;
    let snapshot = session.snapshot().await;

    assert_eq!(snapshot.current_page, 1);
    assert_eq!(snapshot.read_pages, 1);
    assert_eq!(snapshot.progress_percent, 1);
    assert_eq!(snapshot.chapter.title, "Chapter 1");
    assert!(snapshot.entitlement.is_some());
    assert!(store.wait_for_progress(user, book, 1).await);
}

#[tokio::test]
async fn session_resumes_at_the_requested_page_with_stored_state() {
    let store = FakeStore::new();
    let (service, user, book) = owned_book(&store, 100).await;

    let first = open(&service, Some(user), book, OpenOptions::default()).await;
    first.go_to(60).await;
    first.add_bookmark(42, None, None).await;
    drop(first);
    assert!(store.wait_for_progress(user, book, 60).await);
    assert!(store.wait_for_bookmarks(user, book, |b| b.len() == 1).await);

    let options = OpenOptions {
        preview: false,
        resume_page: Some(42),
    };
    let resumed = open(&service, Some(user), book, options).await;
    let snapshot = resumed.snapshot().await;

    assert_eq!(snapshot.current_page, 42);
    assert_eq!(snapshot.read_pages, 60);
    assert_eq!(snapshot.chapter.title, "Chapter 2");
    assert_eq!(snapshot.bookmarks.len(), 1);
    assert_eq!(snapshot.bookmark_at_current_page, Some(snapshot.bookmarks[0].id));
}

#[tokio::test]
async fn out_of_bounds_resume_page_opens_at_page_one() {
    let store = FakeStore::new();
    let (service, user, book) = owned_book(&store, 10).await;
    let options = OpenOptions {
        preview: false,
        resume_page: Some(11),
    };

    let session = open(&service, Some(user), book, options).await;

    assert_eq!(session.snapshot().await.current_page, 1);
}

//=========================================================================================
// Navigation and progress
//=========================================================================================

#[tokio::test]
async fn navigation_raises_but_never_lowers_stored_progress() {
    let store = FakeStore::new();
    let (service, user, book) = owned_book(&store, 100).await;
    let session = open(&service, Some(user), book, OpenOptions::default()).await;

    assert!(matches!(session.go_to(30).await, PageResult::Moved { .. }));
    assert!(matches!(session.go_to(10).await, PageResult::Moved { .. }));
    assert!(matches!(session.next().await, PageResult::Moved { to: 11, .. }));
    assert!(matches!(session.go_to(0).await, PageResult::Rejected { .. }));
    assert!(matches!(session.go_to(101).await, PageResult::Rejected { .. }));

    assert_eq!(session.read_pages().await, 30);
    assert_eq!(session.progress_percent().await, 30);
    assert_eq!(session.current_chapter().await.title, "Chapter 1");
    assert!(store.wait_for_progress(user, book, 30).await);
}

#[tokio::test]
async fn stale_session_cannot_lower_progress_written_by_another() {
    let store = FakeStore::new();
    let (service, user, book) = owned_book(&store, 100).await;
    let laptop = open(&service, Some(user), book, OpenOptions::default()).await;
    assert!(store.wait_for_progress(user, book, 1).await);
    let phone = open(&service, Some(user), book, OpenOptions::default()).await;

    laptop.go_to(80).await;
    assert!(store.wait_for_progress(user, book, 80).await);
    phone.go_to(30).await;
    drop(phone);

    // laptop@1, laptop@80, phone@30
    assert!(store.wait_for_writes(3).await);
    assert_eq!(store.stored_progress(user, book).await, Some(80));
}

#[tokio::test]
async fn closing_a_session_still_flushes_its_last_progress() {
    let store = FakeStore::new();
    let (service, user, book) = owned_book(&store, 100).await;
    store.write_delay_ms.store(20, Ordering::Relaxed);

    let session = open(&service, Some(user), book, OpenOptions::default()).await;
    for page in 2..=50 {
        session.go_to(page).await;
    }
    drop(session);

    assert!(store.wait_for_progress(user, book, 50).await);
    // Intermediate pages were coalesced rather than written one by one.
    assert!(store.write_calls.load(Ordering::Relaxed) < 49);
}

//=========================================================================================
// Bookmarks
//=========================================================================================

#[tokio::test]
async fn toggle_adds_then_removes_and_persists_both() {
    let store = FakeStore::new();
    let (service, user, book) = owned_book(&store, 100).await;
    let session = open(&service, Some(user), book, OpenOptions::default()).await;

    let added = session
        .toggle_bookmark_at_page(7, Some("Key scene".into()), None)
        .await
        .unwrap();
    assert_eq!(added.save_status, SaveStatus::Saved);
    assert!(matches!(added.outcome, ToggleOutcome::Added(ref b) if b.title == "Key scene"));
    assert_eq!(store.stored_bookmarks(user, book).await.len(), 1);

    let removed = session.toggle_bookmark_at_page(7, None, None).await.unwrap();
    assert!(matches!(removed.outcome, ToggleOutcome::Removed(_)));
    assert_eq!(removed.save_status, SaveStatus::Saved);
    assert!(store.stored_bookmarks(user, book).await.is_empty());
    assert!(session.list_bookmarks().await.is_empty());
}

#[tokio::test]
async fn concurrent_toggle_on_the_same_session_is_refused() {
    let store = FakeStore::new();
    let (service, user, book) = owned_book(&store, 100).await;
    let session = open(&service, Some(user), book, OpenOptions::default()).await;
    store.write_delay_ms.store(50, Ordering::Relaxed);

    let (first, second) = tokio::join!(
        session.toggle_bookmark_at_page(3, None, None),
        session.toggle_bookmark_at_page(3, None, None),
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(SessionError::Busy)));
    assert_eq!(session.list_bookmarks().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_edits_and_removals_leave_the_store_matching_memory() {
    let store = FakeStore::new();
    let (service, user, book) = owned_book(&store, 100).await;
    let session = open(&service, Some(user), book, OpenOptions::default()).await;

    for round in 0..200u32 {
        let bookmark = session.add_bookmark(round % 100 + 1, None, None).await;
        let editor = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .update_bookmark(bookmark.id, Some(format!("Edit {}", round)), None)
                    .await
            })
        };
        let remover = {
            let session = session.clone();
            tokio::spawn(async move { session.remove_bookmark(bookmark.id).await })
        };
        let _ = tokio::join!(editor, remover);
    }

    // An acknowledged toggle pair drains everything queued before it.
    session.toggle_bookmark_at_page(100, None, None).await.unwrap();
    session.toggle_bookmark_at_page(100, None, None).await.unwrap();

    let mut in_memory: Vec<Uuid> = session.list_bookmarks().await.iter().map(|b| b.id).collect();
    let mut stored: Vec<Uuid> = store
        .stored_bookmarks(user, book)
        .await
        .iter()
        .map(|b| b.id)
        .collect();
    in_memory.sort();
    stored.sort();
    assert!(in_memory.is_empty());
    assert_eq!(stored, in_memory);
}

#[tokio::test]
async fn toggle_is_refused_while_a_purchase_is_in_flight() {
    let store = FakeStore::new();
    let service = ReaderService::new(store.clone(), fast_settings());
    let book = store.add_book(100, &[]).await;
    let options = OpenOptions {
        preview: true,
        resume_page: None,
    };
    let session = open(&service, Some(Uuid::new_v4()), book, options).await;
    store.entitlement_delay_ms.store(50, Ordering::Relaxed);

    let (purchase, toggle) = tokio::join!(
        session.purchase(service.gate(), 999, "USD"),
        session.toggle_bookmark_at_page(2, None, None),
    );

    assert!(matches!(purchase, Ok(PurchaseOutcome::Granted(_))));
    assert!(matches!(toggle, Err(SessionError::Busy)));
    assert!(session.list_bookmarks().await.is_empty());
}

#[tokio::test]
async fn second_purchase_is_refused_while_the_first_is_in_flight() {
    let store = FakeStore::new();
    let service = ReaderService::new(store.clone(), fast_settings());
    let book = store.add_book(100, &[]).await;
    let options = OpenOptions {
        preview: true,
        resume_page: None,
    };
    let session = open(&service, Some(Uuid::new_v4()), book, options).await;
    store.entitlement_delay_ms.store(50, Ordering::Relaxed);

    let (first, second) = tokio::join!(
        session.purchase(service.gate(), 999, "USD"),
        session.purchase(service.gate(), 999, "USD"),
    );

    assert!(matches!(first, Ok(PurchaseOutcome::Granted(_))));
    assert!(matches!(second, Err(SessionError::Busy)));

    // The flag is released once the purchase completes.
    let again = session.purchase(service.gate(), 999, "USD").await;
    assert!(matches!(again, Ok(PurchaseOutcome::AlreadyOwned(_))));
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let store = FakeStore::new();
    let (service, user, book) = owned_book(&store, 100).await;
    let session = open(&service, Some(user), book, OpenOptions::default()).await;
    assert!(store.wait_for_progress(user, book, 1).await);
    store.transient_write_failures.store(2, Ordering::Relaxed);

    let report = session.toggle_bookmark_at_page(9, None, None).await.unwrap();

    assert_eq!(report.save_status, SaveStatus::Saved);
    assert_eq!(store.stored_bookmarks(user, book).await.len(), 1);
    assert!(!session.changes_not_saved());
}

#[tokio::test]
async fn failed_write_keeps_local_state_and_raises_notice() {
    let store = FakeStore::new();
    let (service, user, book) = owned_book(&store, 100).await;
    let session = open(&service, Some(user), book, OpenOptions::default()).await;
    assert!(store.wait_for_progress(user, book, 1).await);
    store.writes_broken.store(true, Ordering::Relaxed);

    let report = session.toggle_bookmark_at_page(9, None, None).await.unwrap();

    assert_eq!(report.save_status, SaveStatus::NotSaved);
    assert_eq!(session.list_bookmarks().await.len(), 1);
    assert!(session.snapshot().await.changes_not_saved);
    assert!(session.acknowledge_unsaved());
    assert!(!session.changes_not_saved());
}

#[tokio::test]
async fn bookmark_edits_reach_the_store() {
    let store = FakeStore::new();
    let (service, user, book) = owned_book(&store, 100).await;
    let session = open(&service, Some(user), book, OpenOptions::default()).await;

    let bookmark = session.add_bookmark(12, None, None).await;
    assert_eq!(bookmark.title, "Page 12");
    session
        .update_bookmark(bookmark.id, Some("Renamed".into()), Some("a note".into()))
        .await
        .unwrap();
    assert!(session.update_bookmark(Uuid::new_v4(), None, None).await.is_none());

    assert!(
        store
            .wait_for_bookmarks(user, book, |stored| {
                stored
                    .first()
                    .is_some_and(|b| b.title == "Renamed" && b.note.as_deref() == Some("a note"))
            })
            .await
    );

    assert!(session.remove_bookmark(bookmark.id).await.is_some());
    assert!(session.remove_bookmark(bookmark.id).await.is_none());
    assert!(store.wait_for_bookmarks(user, book, |b| b.is_empty()).await);
}

//=========================================================================================
// Preview
//=========================================================================================

#[tokio::test]
async fn preview_bypasses_the_gate_and_caps_pages() {
    let store = FakeStore::new();
    let service = ReaderService::new(store.clone(), fast_settings());
    let book = store.add_book(100, &[1, 21]).await;
    let options = OpenOptions {
        preview: true,
        resume_page: None,
    };

    let session = open(&service, None, book, options).await;

    assert!(session.is_preview());
    assert_eq!(store.entitlement_lookups.load(Ordering::Relaxed), 0);
    assert!(matches!(session.go_to(5).await, PageResult::Moved { .. }));
    assert!(matches!(session.go_to(6).await, PageResult::Rejected { current: 5, .. }));

    let report = session.toggle_bookmark_at_page(5, None, None).await.unwrap();
    assert_eq!(report.save_status, SaveStatus::Ephemeral);
    assert_eq!(store.write_calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn preview_window_is_capped_by_short_books() {
    let store = FakeStore::new();
    let service = ReaderService::new(store.clone(), fast_settings());
    let book = store.add_book(3, &[]).await;
    let options = OpenOptions {
        preview: true,
        resume_page: None,
    };

    let session = open(&service, None, book, options).await;

    assert_eq!(session.snapshot().await.bounds.upper, 3);
}

//=========================================================================================
// Purchase inside a session
//=========================================================================================

#[tokio::test]
async fn purchasing_from_a_preview_records_the_entitlement() {
    let store = FakeStore::new();
    let service = ReaderService::new(store.clone(), fast_settings());
    let book = store.add_book(100, &[]).await;
    let user = Uuid::new_v4();
    let options = OpenOptions {
        preview: true,
        resume_page: None,
    };
    let session = open(&service, Some(user), book, options).await;
    let gate: &EntitlementGate = service.gate();

    let outcome = session.purchase(gate, 999, "USD").await.unwrap();
    assert!(matches!(outcome, PurchaseOutcome::Granted(_)));
    let again = session.purchase(gate, 999, "USD").await.unwrap();
    assert!(matches!(again, PurchaseOutcome::AlreadyOwned(_)));

    assert!(session.snapshot().await.entitlement.is_some());
    assert_eq!(store.entitlements.lock().await.len(), 1);
}
