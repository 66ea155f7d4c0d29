//! Books domain methods on Repository

use sqlx::{Postgres, QueryBuilder};

use super::{like_pattern, Repository};
use crate::{
    error::{AppError, AppResult},
    models::{
        book::{Book, BookQuery, BookRow, CreateBook, ThumbnailChange, UpdateBook},
        pagination::Pagination,
    },
};

const BOOK_SELECT: &str = r#"
    SELECT b.id, b.title, b.author, b.description, b.thumbnail, b.rating,
           b.uploader_id, b.uploaded_at, b.updated_at,
           u.name AS uploader_name, u.email AS uploader_email
    FROM books b
    JOIN users u ON u.id = b.uploader_id
"#;

impl Repository {
    /// Get book by ID
    pub async fn books_get_by_id(&self, id: i32) -> AppResult<Book> {
        let query = format!("{} WHERE b.id = $1", BOOK_SELECT);
        sqlx::query_as::<_, BookRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Book::from)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    /// Search books with filters and pagination
    pub async fn books_search(&self, query: &BookQuery, window: Pagination) -> AppResult<(Vec<Book>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM books b");
        push_book_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(BOOK_SELECT);
        push_book_filters(&mut select, query);
        select
            .push(" ORDER BY b.uploaded_at DESC, b.id DESC LIMIT ")
            .push_bind(window.limit)
            .push(" OFFSET ")
            .push_bind(window.offset());

        let rows = select.build_query_as::<BookRow>().fetch_all(&self.pool).await?;

        Ok((rows.into_iter().map(Book::from).collect(), total))
    }

    /// Create a new book
    pub async fn books_create(&self, uploader_id: i32, data: &CreateBook) -> AppResult<Book> {
        let id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO books (title, author, description, rating, thumbnail, uploader_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&data.title)
        .bind(&data.author)
        .bind(&data.description)
        .bind(data.rating)
        .bind(&data.thumbnail)
        .bind(uploader_id)
        .fetch_one(&self.pool)
        .await?;

        self.books_get_by_id(id).await
    }

    /// Update an existing book
    pub async fn books_update(&self, id: i32, data: &UpdateBook, thumbnail: &ThumbnailChange) -> AppResult<Book> {
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE books SET updated_at = NOW()");

        if let Some(ref title) = data.title {
            builder.push(", title = ").push_bind(title.clone());
        }
        if let Some(ref author) = data.author {
            builder.push(", author = ").push_bind(author.clone());
        }
        if let Some(ref description) = data.description {
            builder.push(", description = ").push_bind(description.clone());
        }
        if let Some(rating) = data.rating {
            builder.push(", rating = ").push_bind(rating);
        }
        match thumbnail {
            ThumbnailChange::Keep => {}
            ThumbnailChange::Replace(path) => {
                builder.push(", thumbnail = ").push_bind(path.clone());
            }
            ThumbnailChange::Clear => {
                builder.push(", thumbnail = NULL");
            }
        }

        builder.push(" WHERE id = ").push_bind(id);

        let result = builder.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Book with id {} not found", id)));
        }

        self.books_get_by_id(id).await
    }

    /// Delete a book
    pub async fn books_delete(&self, id: i32) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Book with id {} not found", id)));
        }
        Ok(())
    }
}

/// Append the WHERE clause for book listing
fn push_book_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &BookQuery) {
    let mut separator = " WHERE ";

    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = like_pattern(search);
        builder
            .push(separator)
            .push("(b.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR b.author ILIKE ")
            .push_bind(pattern)
            .push(")");
        separator = " AND ";
    }
    if let Some(title) = query.title.as_deref().filter(|s| !s.trim().is_empty()) {
        builder.push(separator).push("b.title ILIKE ").push_bind(like_pattern(title));
        separator = " AND ";
    }
    if let Some(author) = query.author.as_deref().filter(|s| !s.trim().is_empty()) {
        builder.push(separator).push("b.author ILIKE ").push_bind(like_pattern(author));
        separator = " AND ";
    }
    if let Some(rating) = query.rating {
        builder.push(separator).push("b.rating = ").push_bind(rating);
        separator = " AND ";
    }
    if let Some(min_rating) = query.min_rating {
        builder.push(separator).push("b.rating >= ").push_bind(min_rating);
        separator = " AND ";
    }
    if let Some(date) = query.date {
        builder
            .push(separator)
            .push("(b.uploaded_at AT TIME ZONE 'UTC')::date = ")
            .push_bind(date);
        separator = " AND ";
    }
    if let Some(uploader) = query.uploader {
        builder.push(separator).push("b.uploader_id = ").push_bind(uploader);
    }
}
