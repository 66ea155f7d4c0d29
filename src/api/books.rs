//! Book catalogue endpoints

use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::Multipart;

use crate::{
    error::{AppError, AppResult},
    models::{
        book::{parse_rating, Book, BookQuery, UpdateBook, MAX_TEXT_LENGTH},
        pagination::Paginated,
    },
    services::books::{NewBook, ThumbnailUpdate},
};

use super::{
    response::{ok, ApiResponse},
    AppPath, AppQuery, AuthenticatedUser, FormData,
};

fn rating_field(form: &FormData) -> AppResult<Option<i16>> {
    form.text("rating")
        .map(|raw| {
            parse_rating(&raw).ok_or_else(|| {
                AppError::Validation("Rating must be an integer between 0 and 5".to_string())
            })
        })
        .transpose()
}

/// Trimmed `title`/`author` field, rejected when longer than the column allows
fn short_text(form: &FormData, name: &str) -> AppResult<Option<String>> {
    match form.text(name) {
        Some(value) if value.chars().count() > MAX_TEXT_LENGTH => Err(AppError::Validation(format!(
            "{} must be at most {} characters",
            capitalized(name),
            MAX_TEXT_LENGTH
        ))),
        value => Ok(value),
    }
}

fn capitalized(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn new_book_from_form(mut form: FormData) -> AppResult<NewBook> {
    let (Some(title), Some(author)) = (short_text(&form, "title")?, short_text(&form, "author")?) else {
        return Err(AppError::Validation("Title and author are required".to_string()));
    };

    Ok(NewBook {
        title,
        author,
        description: form.text("description"),
        rating: rating_field(&form)?.unwrap_or(0),
        thumbnail: form.take_file("thumbnail"),
    })
}

fn book_update_from_form(mut form: FormData) -> AppResult<(UpdateBook, ThumbnailUpdate)> {
    let data = UpdateBook {
        title: short_text(&form, "title")?,
        author: short_text(&form, "author")?,
        description: form.text("description"),
        rating: rating_field(&form)?,
    };

    // A new upload takes precedence over a removal request
    let thumbnail = match form.take_file("thumbnail") {
        Some(upload) => ThumbnailUpdate::Upload(upload),
        None if form.flag("remove_thumbnail") => ThumbnailUpdate::Clear,
        None => ThumbnailUpdate::Keep,
    };

    Ok((data, thumbnail))
}

/// List books with filters and pagination
pub async fn list_books(
    State(state): State<crate::AppState>,
    AppQuery(query): AppQuery<BookQuery>,
) -> AppResult<Json<ApiResponse<Paginated<Book>>>> {
    let books = state.services.books.search_books(&query).await?;
    Ok(ok("Books fetched successfully", books))
}

/// Get book details by ID
pub async fn get_book(
    State(state): State<crate::AppState>,
    AppPath(id): AppPath<i32>,
) -> AppResult<Json<ApiResponse<Book>>> {
    let book = state.services.books.get_book(id).await?;
    Ok(ok("Book fetched successfully", book))
}

/// Create a book (multipart form with optional `thumbnail` file)
pub async fn create_book(
    State(state): State<crate::AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<ApiResponse<Book>>)> {
    let book = new_book_from_form(FormData::read(multipart).await?)?;
    let created = state.services.books.create_book(user_id, book).await?;
    Ok((StatusCode::CREATED, ok("Book created successfully", created)))
}

/// Update a book; only its uploader may do so
pub async fn update_book(
    State(state): State<crate::AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    AppPath(id): AppPath<i32>,
    multipart: Multipart,
) -> AppResult<Json<ApiResponse<Book>>> {
    let (data, thumbnail) = book_update_from_form(FormData::read(multipart).await?)?;
    let updated = state
        .services
        .books
        .update_book(user_id, id, data, thumbnail)
        .await?;
    Ok(ok("Book updated successfully", updated))
}

/// Delete a book; only its uploader may do so
pub async fn delete_book(
    State(state): State<crate::AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    AppPath(id): AppPath<i32>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.services.books.delete_book(user_id, id).await?;
    Ok(Json(ApiResponse::message("Book deleted successfully")))
}
