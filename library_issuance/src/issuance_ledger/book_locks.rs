use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api::BookId;

/// One async mutex per book, so that check-and-update sequences
/// on the same book never interleave while other books proceed freely.
#[derive(Default)]
pub struct BookLocks {
    locks: parking_lot::Mutex<HashMap<BookId, Arc<Mutex<()>>>>,
}

impl BookLocks {
    pub async fn lock(&self, book_id: BookId) -> OwnedMutexGuard<()> {
        let book_lock = self.locks.lock().entry(book_id).or_default().clone();
        book_lock.lock_owned().await
    }
}
