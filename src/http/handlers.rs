//! Placeholder inventory routes behind the security pipeline.
//!
//! These handlers only use the guards' request extensions (`CsrfField`,
//! `CspNonce`, `SessionControl`) and return `HandlerFault` on failure; the
//! pipeline owns every security decision.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Form, Json, Router,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::security::{CspNonce, CsrfField, FaultContext, HandlerFault};
use crate::session::SessionControl;

/// Multipart field holding the CSV upload.
pub const IMPORT_FIELD_NAME: &str = "file";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: u32,
    pub name: String,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct NewItem {
    pub name: String,
    pub quantity: u32,
}

/// In-memory item table.
#[derive(Clone, Default)]
pub struct Inventory {
    items: Arc<DashMap<u32, Item>>,
    next_id: Arc<AtomicU32>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: String, quantity: u32) -> Item {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let item = Item { id, name, quantity };
        self.items.insert(id, item.clone());
        item
    }

    pub fn get(&self, id: u32) -> Option<Item> {
        self.items.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub fn router(inventory: Inventory) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/items", post(create_item))
        .route("/items/import", post(import_items))
        .route("/items/{id}", get(show_item))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/healthz", get(healthz))
        .with_state(inventory)
}

async fn index(State(inventory): State<Inventory>, csrf: CsrfField, nonce: CspNonce) -> Html<String> {
    Html(format!(
        r#"<!doctype html>
<html>
<head><title>Inventory</title></head>
<body>
<p>{count} items in stock</p>
<form method="post" action="/items">
{field}
<input name="name"><input name="quantity" type="number">
<button type="submit">Add</button>
</form>
<form method="post" action="/items/import" enctype="multipart/form-data">
{field}
<input name="{import}" type="file" accept=".csv">
<button type="submit">Import</button>
</form>
<script nonce="{nonce}">document.forms[0].elements.name.focus();</script>
</body>
</html>
"#,
        count = inventory.len(),
        field = csrf.hidden_input(),
        import = IMPORT_FIELD_NAME,
        nonce = nonce.value(),
    ))
}

async fn create_item(State(inventory): State<Inventory>, Form(new): Form<NewItem>) -> impl IntoResponse {
    let item = inventory.insert(new.name, new.quantity);
    tracing::info!(item_id = item.id, "Item created");
    (StatusCode::CREATED, Json(item))
}

/// Import `name,quantity` rows. The first row is a header.
async fn import_items(State(inventory): State<Inventory>, mut multipart: Multipart) -> Result<Json<Vec<Item>>, HandlerFault> {
    let mut imported = Vec::new();
    while let Some(field) = multipart.next_field().await.in_category("CSV import")? {
        if field.name() != Some(IMPORT_FIELD_NAME) {
            continue;
        }
        let text = field.text().await.in_category("CSV import")?;
        for line in text.lines().skip(1).filter(|l| !l.trim().is_empty()) {
            let (name, quantity) = line.rsplit_once(',').unwrap_or((line, ""));
            let quantity = quantity.trim().parse::<u32>().in_category("CSV import")?;
            imported.push(inventory.insert(name.trim().to_string(), quantity));
        }
    }
    tracing::info!(rows = imported.len(), "CSV import finished");
    Ok(Json(imported))
}

async fn show_item(State(inventory): State<Inventory>, Path(id): Path<String>) -> Result<impl IntoResponse, HandlerFault> {
    let id = id.parse::<u32>().in_category("item lookup")?;
    Ok(match inventory.get(id) {
        Some(item) => Json(item).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    })
}

async fn login(control: SessionControl) -> StatusCode {
    control.renew();
    StatusCode::NO_CONTENT
}

async fn logout(control: SessionControl) -> StatusCode {
    control.destroy();
    StatusCode::NO_CONTENT
}

async fn healthz() -> &'static str {
    "ok"
}
