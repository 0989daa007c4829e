use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, to_bson, Document},
    error::{ErrorKind, WriteFailure},
    options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReplaceOptions, ReturnDocument},
    Client as MongoClient, Collection, Database, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};

use super::{
    decode_page_token, encode_page_token, AssignmentGuard, Page, Store, StoreError,
    DEFAULT_PAGE_SIZE,
};
use crate::models::{
    AccessRequest, CachedArgOptions, CachedTarget, Deployment, Preflight, Provider, TargetGroup,
    TargetGroupAssignment,
};

const DUPLICATE_KEY: i32 = 11000;

/// MongoDB-backed store. Conditional writes use unique indexes and filtered
/// `find_one_and_update` so that the compare and the set happen server-side.
#[derive(Clone)]
pub struct MongoStore {
    client: MongoClient,
    db: Database,
    page_size: usize,
}

fn backend(e: impl Into<anyhow::Error>) -> StoreError {
    StoreError::Backend(e.into())
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    ) || matches!(
        err.kind.as_ref(),
        ErrorKind::Command(e) if e.code == DUPLICATE_KEY
    )
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str, page_size: usize) -> Result<Self, StoreError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            backend(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self {
            client,
            db,
            page_size: if page_size == 0 { DEFAULT_PAGE_SIZE } else { page_size },
        })
    }

    pub async fn initialize_indexes(&self) -> Result<(), StoreError> {
        tracing::info!("Creating MongoDB indexes for access-service");

        let unique_id = |name: &str| {
            IndexModel::builder()
                .keys(doc! { "id": 1 })
                .options(
                    IndexOptions::builder()
                        .name(name.to_string())
                        .unique(true)
                        .build(),
                )
                .build()
        };

        self.target_groups()
            .create_index(unique_id("target_group_id_idx"), None)
            .await
            .map_err(backend)?;
        self.preflights()
            .create_index(unique_id("preflight_id_idx"), None)
            .await
            .map_err(backend)?;
        self.requests()
            .create_index(unique_id("request_id_idx"), None)
            .await
            .map_err(backend)?;
        self.cached_targets()
            .create_index(unique_id("cached_target_id_idx"), None)
            .await
            .map_err(backend)?;

        // At most one deployment may hold an assignment to a given target group.
        let deployment_indexes = [
            unique_id("deployment_id_idx"),
            IndexModel::builder()
                .keys(doc! { "target_group_assignment.target_group_id": 1 })
                .options(
                    IndexOptions::builder()
                        .name("deployment_target_group_idx".to_string())
                        .unique(true)
                        .partial_filter_expression(doc! {
                            "target_group_assignment.target_group_id": { "$exists": true }
                        })
                        .build(),
                )
                .build(),
        ];
        self.deployments()
            .create_indexes(deployment_indexes, None)
            .await
            .map_err(backend)?;

        let request_user_index = IndexModel::builder()
            .keys(doc! { "requested_by.id": 1, "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("request_user_created_idx".to_string())
                    .build(),
            )
            .build();
        self.requests()
            .create_index(request_user_index, None)
            .await
            .map_err(backend)?;

        let arg_options_index = IndexModel::builder()
            .keys(doc! { "provider_id": 1, "arg_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("arg_options_key_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.arg_options()
            .create_index(arg_options_index, None)
            .await
            .map_err(backend)?;

        tracing::info!("Successfully created all MongoDB indexes");
        Ok(())
    }

    fn target_groups(&self) -> Collection<TargetGroup> {
        self.db.collection("target_groups")
    }

    fn deployments(&self) -> Collection<Deployment> {
        self.db.collection("deployments")
    }

    fn preflights(&self) -> Collection<Preflight> {
        self.db.collection("preflights")
    }

    fn requests(&self) -> Collection<AccessRequest> {
        self.db.collection("requests")
    }

    fn cached_targets(&self) -> Collection<CachedTarget> {
        self.db.collection("cached_targets")
    }

    fn arg_options(&self) -> Collection<CachedArgOptions> {
        self.db.collection("arg_options")
    }

    async fn upsert<T>(
        &self,
        collection: Collection<T>,
        filter: Document,
        item: &T,
    ) -> Result<(), StoreError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync,
    {
        collection
            .replace_one(filter, item, ReplaceOptions::builder().upsert(true).build())
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn page<T>(
        &self,
        collection: Collection<T>,
        filter: Document,
        sort: Document,
        page: Option<&str>,
    ) -> Result<Page<T>, StoreError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync,
    {
        let offset = decode_page_token(page)?;
        // One extra row tells us whether another page exists.
        let options = FindOptions::builder()
            .sort(sort)
            .skip(offset as u64)
            .limit((self.page_size + 1) as i64)
            .build();

        let cursor = collection.find(filter, options).await.map_err(backend)?;
        let mut items: Vec<T> = cursor.try_collect().await.map_err(backend)?;

        let next = if items.len() > self.page_size {
            items.truncate(self.page_size);
            Some(encode_page_token(offset + self.page_size))
        } else {
            None
        };
        Ok(Page { items, next })
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                backend(e)
            })?;
        Ok(())
    }

    async fn get_target_group(&self, id: &str) -> Result<Option<TargetGroup>, StoreError> {
        self.target_groups()
            .find_one(doc! { "id": id }, None)
            .await
            .map_err(backend)
    }

    async fn list_target_groups(
        &self,
        page: Option<&str>,
    ) -> Result<Page<TargetGroup>, StoreError> {
        self.page(self.target_groups(), doc! {}, doc! { "id": 1 }, page)
            .await
    }

    async fn insert_target_group(&self, group: &TargetGroup) -> Result<(), StoreError> {
        match self.target_groups().insert_one(group, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::ConditionFailed),
            Err(e) => Err(backend(e)),
        }
    }

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, StoreError> {
        self.deployments()
            .find_one(doc! { "id": id }, None)
            .await
            .map_err(backend)
    }

    async fn upsert_deployment(
        &self,
        deployment: &Deployment,
        guard: &AssignmentGuard,
    ) -> Result<Deployment, StoreError> {
        let provider = to_bson(&deployment.provider).map_err(backend)?;
        let diagnostics = to_bson(&deployment.diagnostics).map_err(backend)?;
        let set = doc! {
            "provider": provider,
            "function_url": deployment.function_url.as_deref(),
            "diagnostics": diagnostics,
        };

        // The assignment is only ever written on insert, and only as null.
        let (filter, update, upsert) = match guard {
            AssignmentGuard::Any => (
                doc! { "id": &deployment.id },
                doc! { "$set": set, "$setOnInsert": { "target_group_assignment": null } },
                true,
            ),
            AssignmentGuard::Unassigned => (
                doc! { "id": &deployment.id, "target_group_assignment": null },
                doc! { "$set": set },
                true,
            ),
            AssignmentGuard::AssignedTo(target_group_id) => (
                doc! {
                    "id": &deployment.id,
                    "target_group_assignment.target_group_id": target_group_id,
                },
                doc! { "$set": set },
                false,
            ),
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .upsert(upsert)
            .build();

        match self
            .deployments()
            .find_one_and_update(filter, update, options)
            .await
        {
            Ok(Some(deployment)) => Ok(deployment),
            Ok(None) => Err(StoreError::ConditionFailed),
            // An upsert whose guard missed an existing deployment collides on the id index.
            Err(e) if is_duplicate_key(&e) => Err(StoreError::ConditionFailed),
            Err(e) => Err(backend(e)),
        }
    }

    async fn find_deployment_for_target_group(
        &self,
        target_group_id: &str,
    ) -> Result<Option<Deployment>, StoreError> {
        self.deployments()
            .find_one(
                doc! { "target_group_assignment.target_group_id": target_group_id },
                None,
            )
            .await
            .map_err(backend)
    }

    async fn assign_deployment(
        &self,
        deployment_id: &str,
        provider: &Provider,
        assignment: &TargetGroupAssignment,
    ) -> Result<Deployment, StoreError> {
        let provider = to_bson(provider).map_err(backend)?;
        let assignment = to_bson(assignment).map_err(backend)?;
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let updated = self
            .deployments()
            .find_one_and_update(
                doc! {
                    "id": deployment_id,
                    "provider": provider,
                    "target_group_assignment": null,
                },
                doc! { "$set": { "target_group_assignment": assignment } },
                options,
            )
            .await;

        match updated {
            Ok(Some(deployment)) => Ok(deployment),
            Ok(None) => Err(StoreError::ConditionFailed),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::ConditionFailed),
            Err(e) => Err(backend(e)),
        }
    }

    async fn clear_deployment_assignment(
        &self,
        deployment_id: &str,
        target_group_id: &str,
    ) -> Result<Deployment, StoreError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.deployments()
            .find_one_and_update(
                doc! {
                    "id": deployment_id,
                    "target_group_assignment.target_group_id": target_group_id,
                },
                doc! { "$set": { "target_group_assignment": null } },
                options,
            )
            .await
            .map_err(backend)?
            .ok_or(StoreError::ConditionFailed)
    }

    async fn put_preflight(&self, preflight: &Preflight) -> Result<(), StoreError> {
        self.upsert(self.preflights(), doc! { "id": &preflight.id }, preflight)
            .await
    }

    async fn get_preflight(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Option<Preflight>, StoreError> {
        self.preflights()
            .find_one(
                doc! { "id": id, "user_id": user_id, "consumed_at": null },
                None,
            )
            .await
            .map_err(backend)
    }

    async fn claim_preflight(
        &self,
        id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Preflight>, StoreError> {
        let consumed_at = mongodb::bson::DateTime::from_chrono(now);
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.preflights()
            .find_one_and_update(
                doc! { "id": id, "user_id": user_id, "consumed_at": null },
                doc! { "$set": { "consumed_at": consumed_at } },
                options,
            )
            .await
            .map_err(backend)
    }

    async fn put_request(&self, request: &AccessRequest) -> Result<(), StoreError> {
        self.upsert(self.requests(), doc! { "id": &request.id }, request)
            .await
    }

    async fn get_request(&self, id: &str) -> Result<Option<AccessRequest>, StoreError> {
        self.requests()
            .find_one(doc! { "id": id }, None)
            .await
            .map_err(backend)
    }

    async fn list_requests_for_user(
        &self,
        user_id: &str,
        page: Option<&str>,
    ) -> Result<Page<AccessRequest>, StoreError> {
        self.page(
            self.requests(),
            doc! { "requested_by.id": user_id },
            doc! { "created_at": -1, "id": 1 },
            page,
        )
        .await
    }

    async fn list_requests(&self, page: Option<&str>) -> Result<Page<AccessRequest>, StoreError> {
        self.page(
            self.requests(),
            doc! {},
            doc! { "created_at": -1, "id": 1 },
            page,
        )
        .await
    }

    async fn get_cached_target(&self, id: &str) -> Result<Option<CachedTarget>, StoreError> {
        self.cached_targets()
            .find_one(doc! { "id": id }, None)
            .await
            .map_err(backend)
    }

    async fn put_cached_target(&self, target: &CachedTarget) -> Result<(), StoreError> {
        self.upsert(self.cached_targets(), doc! { "id": &target.id }, target)
            .await
    }

    async fn list_cached_targets(
        &self,
        page: Option<&str>,
    ) -> Result<Page<CachedTarget>, StoreError> {
        self.page(self.cached_targets(), doc! {}, doc! { "id": 1 }, page)
            .await
    }

    async fn get_arg_options(
        &self,
        provider_id: &str,
        arg_id: &str,
    ) -> Result<Option<CachedArgOptions>, StoreError> {
        self.arg_options()
            .find_one(doc! { "provider_id": provider_id, "arg_id": arg_id }, None)
            .await
            .map_err(backend)
    }

    async fn put_arg_options(&self, options: &CachedArgOptions) -> Result<(), StoreError> {
        self.upsert(
            self.arg_options(),
            doc! { "provider_id": &options.provider_id, "arg_id": &options.arg_id },
            options,
        )
        .await
    }
}
