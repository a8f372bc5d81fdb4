// ABOUTME: Collection viewer and database overview
// ABOUTME: Paginated, read-only access to raw documents on the current primary

use std::time::Duration;

use futures::TryStreamExt;
use thiserror::Error;

use crate::db::mongo::MongoError;
use crate::db::registry::RegistryError;
use crate::db::{MongoServer, RegistryStore};
use crate::models::{DatabaseOverview, DocumentPage, Pagination};

#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("No primary server is configured")]
    NoPrimary,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Mongo(#[from] MongoError),
}

/// Hard cap on documents per page
pub const MAX_PAGE_SIZE: u64 = 100;

/// Clamp requested paging values into a valid window.
/// Returns the effective page plus the skip offset for the query.
pub fn compute_pagination(
    requested_page: u64,
    requested_size: u64,
    total: u64,
) -> (Pagination, u64, u64) {
    let page_size = requested_size.clamp(1, MAX_PAGE_SIZE);
    let total_pages = (total.div_ceil(page_size)).max(1);
    let page = requested_page.clamp(1, total_pages);
    let skip = (page - 1) * page_size;

    (
        Pagination {
            page,
            total_pages,
            total,
        },
        skip,
        page_size,
    )
}

/// One page of raw documents from a collection on the current primary
pub async fn list_documents(
    registry: &RegistryStore,
    collection: &str,
    page: u64,
    page_size: u64,
    timeout: Duration,
) -> Result<DocumentPage, ViewerError> {
    let primary = registry.get_current_primary()?.ok_or(ViewerError::NoPrimary)?;
    let server = MongoServer::connect(&primary, timeout).await?;

    if !server.collection_exists(collection).await? {
        return Err(MongoError::CollectionNotFound(collection.to_string()).into());
    }

    let total = server.count_documents(collection).await?;
    let (pagination, skip, limit) = compute_pagination(page, page_size, total);

    let mut cursor = server
        .find_page(collection, skip, limit as i64)
        .await?;
    let mut documents = Vec::with_capacity(limit as usize);
    while let Some(doc) = cursor.try_next().await.map_err(MongoError::from)? {
        documents.push(doc);
    }

    Ok(DocumentPage {
        documents,
        pagination,
    })
}

/// Collection stats of the current primary; probe failures come back as
/// a disconnected overview rather than an error
pub async fn overview(registry: &RegistryStore, timeout: Duration) -> DatabaseOverview {
    let primary = match registry.get_current_primary() {
        Ok(Some(p)) => p,
        Ok(None) => {
            return DatabaseOverview {
                db_name: String::new(),
                connected: false,
                collections: Vec::new(),
                total_size: 0,
                error: Some("No primary server is configured".to_string()),
            }
        }
        Err(e) => {
            return DatabaseOverview {
                db_name: String::new(),
                connected: false,
                collections: Vec::new(),
                total_size: 0,
                error: Some(e.to_string()),
            }
        }
    };

    let result = tokio::time::timeout(timeout, async {
        let server = MongoServer::connect(&primary, timeout).await?;
        server.list_collections().await
    })
    .await;

    match result {
        Ok(Ok(collections)) => {
            let total_size = collections.iter().map(|c| c.size).sum();
            DatabaseOverview {
                db_name: primary.database,
                connected: true,
                collections,
                total_size,
                error: None,
            }
        }
        Ok(Err(e)) => DatabaseOverview {
            db_name: primary.database,
            connected: false,
            collections: Vec::new(),
            total_size: 0,
            error: Some(e.to_string()),
        },
        Err(_) => DatabaseOverview {
            db_name: primary.database,
            connected: false,
            collections: Vec::new(),
            total_size: 0,
            error: Some(format!(
                "overview timed out after {}s",
                timeout.as_secs()
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_zero_clamps_to_first_page() {
        let (p, skip, size) = compute_pagination(0, 20, 95);
        assert_eq!(p.page, 1);
        assert_eq!(skip, 0);
        assert_eq!(size, 20);
        assert_eq!(p.total_pages, 5);
    }

    #[test]
    fn page_beyond_end_clamps_to_last_page() {
        let (p, skip, _) = compute_pagination(99, 20, 95);
        assert_eq!(p.page, 5);
        assert_eq!(skip, 80);
    }

    #[test]
    fn page_size_is_bounded() {
        let (_, _, size) = compute_pagination(1, 100_000, 10);
        assert_eq!(size, MAX_PAGE_SIZE);
        let (_, _, size) = compute_pagination(1, 0, 10);
        assert_eq!(size, 1);
    }

    #[test]
    fn empty_collection_has_one_empty_page() {
        let (p, skip, _) = compute_pagination(3, 25, 0);
        assert_eq!(p.page, 1);
        assert_eq!(p.total_pages, 1);
        assert_eq!(p.total, 0);
        assert_eq!(skip, 0);
    }

    #[test]
    fn exact_multiple_rounds_cleanly() {
        let (p, _, _) = compute_pagination(1, 10, 100);
        assert_eq!(p.total_pages, 10);
        let (p, _, _) = compute_pagination(1, 10, 101);
        assert_eq!(p.total_pages, 11);
    }
}
