use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;

use super::BookRepository;
use crate::models::{Book, BookFields};

/// Process-local book store.
///
/// Ids start at 1 and are never reused, even after a delete.
#[derive(Debug)]
pub struct InMemoryBookRepository {
    books: RwLock<BTreeMap<u64, Book>>,
    next_id: AtomicU64,
}

impl InMemoryBookRepository {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for InMemoryBookRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl BookRepository for InMemoryBookRepository {
    fn list(&self) -> Vec<Book> {
        self.books.read().values().cloned().collect()
    }

    fn create(&self, fields: BookFields) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let book = Book {
            id,
            title: fields.title,
            author: fields.author,
            published_year: fields.published_year,
            isbn: fields.isbn,
            created_at: Some(now),
            updated_at: Some(now),
        };
        self.books.write().insert(id, book);
        id
    }

    fn get(&self, id: u64) -> Option<Book> {
        self.books.read().get(&id).cloned()
    }

    fn update(&self, id: u64, fields: BookFields) -> bool {
        let mut books = self.books.write();
        let Some(book) = books.get_mut(&id) else {
            return false;
        };
        book.title = fields.title;
        book.author = fields.author;
        book.published_year = fields.published_year;
        book.isbn = fields.isbn;
        book.updated_at = Some(Utc::now());
        true
    }

    fn delete(&self, id: u64) {
        self.books.write().remove(&id);
    }
}
