use axum::{
    Json, debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::{
    AppResult, AppState,
    db::Store,
    delivery::MessageRouter,
    history::{Cursor, HistoryPaginator, Page, parse_limit},
    models::{Content, Identity, Message, NewMessage, ServerEvent},
};

#[derive(Deserialize)]
pub(crate) struct HistoryQuery {
    limit: Option<String>,
    before_id: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct SendMessageBody {
    username: String,
    content: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn history(
    Path(room): Path<String>,
    Query(HistoryQuery { limit, before_id }): Query<HistoryQuery>,
    State(history): State<HistoryPaginator>,
) -> AppResult<Json<Page>> {
    let before = before_id
        .as_deref()
        .filter(|raw| !raw.is_empty())
        .map(str::parse::<Cursor>)
        .transpose()?;
    let limit = parse_limit(limit.as_deref())?;

    let page = history.page(&room, limit, before).await?;
    Ok(Json(page))
}

#[debug_handler(state = AppState)]
pub(crate) async fn post_message(
    Path(room): Path<String>,
    State(store): State<Store>,
    State(router): State<MessageRouter>,
    Json(SendMessageBody { username, content }): Json<SendMessageBody>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let identity = Identity::parse(&username)?;
    let content = Content::parse(&content)?;

    let message = store.insert(NewMessage::new(&room, &identity, content)).await?;
    router
        .broadcast(&room, &ServerEvent::Message { item: message.clone() })
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}
