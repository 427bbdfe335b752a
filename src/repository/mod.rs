//! Book storage behind a trait so handlers never depend on a concrete store.

mod memory;

pub use memory::InMemoryBookRepository;

use crate::models::{Book, BookFields};

/// Storage operations the HTTP handlers rely on.
///
/// Implementations must be safe to share across request tasks.
pub trait BookRepository: Send + Sync {
    /// All books ordered by id.
    fn list(&self) -> Vec<Book>;

    /// Store a new book and return its assigned id.
    fn create(&self, fields: BookFields) -> u64;

    fn get(&self, id: u64) -> Option<Book>;

    /// Replace every field of an existing book.
    ///
    /// Returns `false` when no book has this id.
    fn update(&self, id: u64, fields: BookFields) -> bool;

    /// Remove a book. Deleting an unknown id is not an error.
    fn delete(&self, id: u64);
}
