//! Book catalogue service

use crate::{
    error::{AppError, AppResult},
    models::{
        book::{Book, BookQuery, CreateBook, ThumbnailChange, UpdateBook},
        pagination::{Paginated, Pagination},
    },
    repository::Repository,
    services::storage::{FileStorage, UploadedFile},
};

/// New book as submitted by a client
#[derive(Debug, Clone)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub description: Option<String>,
    pub rating: i16,
    pub thumbnail: Option<UploadedFile>,
}

/// Requested thumbnail change on update
#[derive(Debug, Clone)]
pub enum ThumbnailUpdate {
    Keep,
    Upload(UploadedFile),
    Clear,
}

#[derive(Clone)]
pub struct BooksService {
    repository: Repository,
    storage: FileStorage,
}

impl BooksService {
    pub fn new(repository: Repository, storage: FileStorage) -> Self {
        Self { repository, storage }
    }

    /// Search books with filters
    pub async fn search_books(&self, query: &BookQuery) -> AppResult<Paginated<Book>> {
        let window = Pagination::new(query.page, query.limit);
        let (books, total) = self.repository.books_search(query, window).await?;
        Ok(Paginated::new(books, total, window))
    }

    pub async fn get_book(&self, id: i32) -> AppResult<Book> {
        self.repository.books_get_by_id(id).await
    }

    /// Create a book owned by `uploader_id`
    pub async fn create_book(&self, uploader_id: i32, book: NewBook) -> AppResult<Book> {
        let thumbnail = match book.thumbnail {
            Some(ref upload) => Some(self.storage.save(upload).await?),
            None => None,
        };

        let data = CreateBook {
            title: book.title,
            author: book.author,
            description: book.description,
            rating: book.rating,
            thumbnail,
        };

        match self.repository.books_create(uploader_id, &data).await {
            Ok(created) => {
                tracing::info!("User {} created book {}", uploader_id, created.id);
                Ok(created)
            }
            Err(e) => {
                if let Some(ref path) = data.thumbnail {
                    self.storage.remove(path).await;
                }
                Err(e)
            }
        }
    }

    /// Fetch a book and make sure `user_id` uploaded it
    async fn get_owned(&self, user_id: i32, id: i32) -> AppResult<Book> {
        let book = self.repository.books_get_by_id(id).await?;
        if !book.is_owned_by(user_id) {
            return Err(AppError::Authorization(
                "Only the uploader can modify this book".to_string(),
            ));
        }
        Ok(book)
    }

    /// Update a book (uploader only)
    pub async fn update_book(
        &self,
        user_id: i32,
        id: i32,
        data: UpdateBook,
        thumbnail: ThumbnailUpdate,
    ) -> AppResult<Book> {
        let existing = self.get_owned(user_id, id).await?;

        let change = match thumbnail {
            ThumbnailUpdate::Keep => ThumbnailChange::Keep,
            ThumbnailUpdate::Upload(ref upload) => ThumbnailChange::Replace(self.storage.save(upload).await?),
            ThumbnailUpdate::Clear => ThumbnailChange::Clear,
        };

        let updated = match self.repository.books_update(id, &data, &change).await {
            Ok(updated) => updated,
            Err(e) => {
                if let ThumbnailChange::Replace(ref path) = change {
                    self.storage.remove(path).await;
                }
                return Err(e);
            }
        };

        if change != ThumbnailChange::Keep {
            if let Some(old) = existing.thumbnail {
                self.storage.remove(&old).await;
            }
        }

        Ok(updated)
    }

    /// Delete a book and its thumbnail (uploader only)
    pub async fn delete_book(&self, user_id: i32, id: i32) -> AppResult<()> {
        let existing = self.get_owned(user_id, id).await?;
        self.repository.books_delete(id).await?;
        if let Some(path) = existing.thumbnail {
            self.storage.remove(&path).await;
        }
        tracing::info!("User {} deleted book {}", user_id, id);
        Ok(())
    }
}
