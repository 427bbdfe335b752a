mod books;
mod health;

pub use books::{create_book, delete_book, get_book, list_books, update_book};
pub use health::health_check;
