mod book;

pub use book::{
    Book, BookFields, CreateBookRequest, CreatedResponse, HealthResponse, UpdateBookRequest,
};
