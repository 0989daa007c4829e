use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};

use super::{
    decode_page_token, paginate, AssignmentGuard, Page, Store, StoreError, DEFAULT_PAGE_SIZE,
};
use crate::models::{
    AccessRequest, CachedArgOptions, CachedTarget, Deployment, Preflight, Provider, TargetGroup,
    TargetGroupAssignment,
};

/// Process-local store. Per-key atomicity comes from the shard locks of
/// `DashMap`; the target group -> deployment link index makes the
/// one-deployment-per-group rule atomic as well.
///
/// Lock order is always `deployments` before `links`.
pub struct InMemoryStore {
    page_size: usize,
    target_groups: DashMap<String, TargetGroup>,
    deployments: DashMap<String, Deployment>,
    links: DashMap<String, String>,
    preflights: DashMap<String, Preflight>,
    requests: DashMap<String, AccessRequest>,
    targets: DashMap<String, CachedTarget>,
    arg_options: DashMap<(String, String), CachedArgOptions>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            target_groups: DashMap::new(),
            deployments: DashMap::new(),
            links: DashMap::new(),
            preflights: DashMap::new(),
            requests: DashMap::new(),
            targets: DashMap::new(),
            arg_options: DashMap::new(),
        }
    }

    pub fn preflight_count(&self) -> usize {
        self.preflights.len()
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    fn page_of<T: Clone>(
        &self,
        mut items: Vec<T>,
        page: Option<&str>,
        order: impl FnMut(&T, &T) -> std::cmp::Ordering,
    ) -> Result<Page<T>, StoreError> {
        let offset = decode_page_token(page)?;
        items.sort_by(order);
        Ok(paginate(items, offset, self.page_size))
    }
}

fn newest_first(a: &AccessRequest, b: &AccessRequest) -> std::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_target_group(&self, id: &str) -> Result<Option<TargetGroup>, StoreError> {
        Ok(self.target_groups.get(id).map(|g| g.value().clone()))
    }

    async fn list_target_groups(
        &self,
        page: Option<&str>,
    ) -> Result<Page<TargetGroup>, StoreError> {
        let items = self.target_groups.iter().map(|g| g.value().clone()).collect();
        self.page_of(items, page, |a: &TargetGroup, b| a.id.cmp(&b.id))
    }

    async fn insert_target_group(&self, group: &TargetGroup) -> Result<(), StoreError> {
        match self.target_groups.entry(group.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::ConditionFailed),
            Entry::Vacant(slot) => {
                slot.insert(group.clone());
                Ok(())
            }
        }
    }

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, StoreError> {
        Ok(self.deployments.get(id).map(|d| d.value().clone()))
    }

    async fn upsert_deployment(
        &self,
        deployment: &Deployment,
        guard: &AssignmentGuard,
    ) -> Result<Deployment, StoreError> {
        match self.deployments.entry(deployment.id.clone()) {
            Entry::Occupied(mut slot) => {
                let current = slot.get_mut();
                let allowed = match guard {
                    AssignmentGuard::Any => true,
                    AssignmentGuard::Unassigned => !current.is_assigned(),
                    AssignmentGuard::AssignedTo(group) => current.assigned_to(group),
                };
                if !allowed {
                    return Err(StoreError::ConditionFailed);
                }
                current.provider = deployment.provider.clone();
                current.function_url = deployment.function_url.clone();
                current.diagnostics = deployment.diagnostics.clone();
                Ok(current.clone())
            }
            Entry::Vacant(slot) => {
                if matches!(guard, AssignmentGuard::AssignedTo(_)) {
                    return Err(StoreError::ConditionFailed);
                }
                let fresh = Deployment {
                    target_group_assignment: None,
                    ..deployment.clone()
                };
                slot.insert(fresh.clone());
                Ok(fresh)
            }
        }
    }

    async fn find_deployment_for_target_group(
        &self,
        target_group_id: &str,
    ) -> Result<Option<Deployment>, StoreError> {
        let deployment_id = self.links.get(target_group_id).map(|r| r.value().clone());
        Ok(deployment_id.and_then(|id| self.deployments.get(&id).map(|d| d.value().clone())))
    }

    async fn assign_deployment(
        &self,
        deployment_id: &str,
        provider: &Provider,
        assignment: &TargetGroupAssignment,
    ) -> Result<Deployment, StoreError> {
        let mut deployment = self
            .deployments
            .get_mut(deployment_id)
            .ok_or(StoreError::ConditionFailed)?;

        if deployment.is_assigned() || &deployment.provider != provider {
            return Err(StoreError::ConditionFailed);
        }

        match self.links.entry(assignment.target_group_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::ConditionFailed),
            Entry::Vacant(slot) => {
                slot.insert(deployment_id.to_string());
                deployment.target_group_assignment = Some(assignment.clone());
                Ok(deployment.value().clone())
            }
        }
    }

    async fn clear_deployment_assignment(
        &self,
        deployment_id: &str,
        target_group_id: &str,
    ) -> Result<Deployment, StoreError> {
        let mut deployment = self
            .deployments
            .get_mut(deployment_id)
            .ok_or(StoreError::ConditionFailed)?;

        if !deployment.assigned_to(target_group_id) {
            return Err(StoreError::ConditionFailed);
        }

        deployment.target_group_assignment = None;
        self.links
            .remove_if(target_group_id, |_, dep_id| dep_id == deployment_id);
        Ok(deployment.value().clone())
    }

    async fn put_preflight(&self, preflight: &Preflight) -> Result<(), StoreError> {
        self.preflights
            .insert(preflight.id.clone(), preflight.clone());
        Ok(())
    }

    async fn get_preflight(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Option<Preflight>, StoreError> {
        Ok(self
            .preflights
            .get(id)
            .filter(|p| p.user_id == user_id && !p.is_consumed())
            .map(|p| p.value().clone()))
    }

    async fn claim_preflight(
        &self,
        id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Preflight>, StoreError> {
        let Some(mut preflight) = self.preflights.get_mut(id) else {
            return Ok(None);
        };
        if preflight.user_id != user_id || preflight.is_consumed() {
            return Ok(None);
        }
        preflight.consumed_at = Some(now);
        Ok(Some(preflight.value().clone()))
    }

    async fn put_request(&self, request: &AccessRequest) -> Result<(), StoreError> {
        self.requests.insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn get_request(&self, id: &str) -> Result<Option<AccessRequest>, StoreError> {
        Ok(self.requests.get(id).map(|r| r.value().clone()))
    }

    async fn list_requests_for_user(
        &self,
        user_id: &str,
        page: Option<&str>,
    ) -> Result<Page<AccessRequest>, StoreError> {
        let items = self
            .requests
            .iter()
            .filter(|r| r.requested_by.id == user_id)
            .map(|r| r.value().clone())
            .collect();
        self.page_of(items, page, newest_first)
    }

    async fn list_requests(&self, page: Option<&str>) -> Result<Page<AccessRequest>, StoreError> {
        let items = self.requests.iter().map(|r| r.value().clone()).collect();
        self.page_of(items, page, newest_first)
    }

    async fn get_cached_target(&self, id: &str) -> Result<Option<CachedTarget>, StoreError> {
        Ok(self.targets.get(id).map(|t| t.value().clone()))
    }

    async fn put_cached_target(&self, target: &CachedTarget) -> Result<(), StoreError> {
        self.targets.insert(target.id.clone(), target.clone());
        Ok(())
    }

    async fn list_cached_targets(
        &self,
        page: Option<&str>,
    ) -> Result<Page<CachedTarget>, StoreError> {
        let items = self.targets.iter().map(|t| t.value().clone()).collect();
        self.page_of(items, page, |a: &CachedTarget, b| a.id.cmp(&b.id))
    }

    async fn get_arg_options(
        &self,
        provider_id: &str,
        arg_id: &str,
    ) -> Result<Option<CachedArgOptions>, StoreError> {
        let key = (provider_id.to_string(), arg_id.to_string());
        Ok(self.arg_options.get(&key).map(|o| o.value().clone()))
    }

    async fn put_arg_options(&self, options: &CachedArgOptions) -> Result<(), StoreError> {
        let key = (options.provider_id.clone(), options.arg_id.clone());
        self.arg_options.insert(key, options.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ec2() -> Provider {
        Provider::new("acme", "ec2", "1.0.0")
    }

    fn deployment(id: &str) -> Deployment {
        Deployment {
            id: id.to_string(),
            provider: ec2(),
            function_url: None,
            diagnostics: vec![],
            target_group_assignment: None,
        }
    }

    fn assignment(target_group_id: &str) -> TargetGroupAssignment {
        TargetGroupAssignment {
            target_group_id: target_group_id.to_string(),
            priority: 1,
            diagnostics: vec![],
        }
    }

    #[tokio::test]
    async fn only_one_deployment_per_target_group() {
        let store = InMemoryStore::new();
        store
            .upsert_deployment(&deployment("d1"), &AssignmentGuard::Any)
            .await
            .unwrap();
        store
            .upsert_deployment(&deployment("d2"), &AssignmentGuard::Any)
            .await
            .unwrap();

        store
            .assign_deployment("d1", &ec2(), &assignment("aws"))
            .await
            .unwrap();
        assert!(matches!(
            store.assign_deployment("d2", &ec2(), &assignment("aws")).await,
            Err(StoreError::ConditionFailed)
        ));

        let linked = store.find_deployment_for_target_group("aws").await.unwrap();
        assert_eq!(linked.map(|d| d.id), Some("d1".to_string()));
    }

    #[tokio::test]
    async fn assignment_requires_the_checked_provider() {
        let store = InMemoryStore::new();
        store
            .upsert_deployment(&deployment("d1"), &AssignmentGuard::Any)
            .await
            .unwrap();

        let other = Provider::new("acme", "ec2", "2.0.0");
        assert!(matches!(
            store.assign_deployment("d1", &other, &assignment("aws")).await,
            Err(StoreError::ConditionFailed)
        ));
    }

    #[tokio::test]
    async fn upsert_never_touches_the_assignment() {
        let store = InMemoryStore::new();
        store
            .upsert_deployment(&deployment("d1"), &AssignmentGuard::Any)
            .await
            .unwrap();
        store
            .assign_deployment("d1", &ec2(), &assignment("aws"))
            .await
            .unwrap();

        let mut update = deployment("d1");
        update.function_url = Some("https://d1.example.com".to_string());
        let updated = store
            .upsert_deployment(&update, &AssignmentGuard::Any)
            .await
            .unwrap();
        assert!(updated.assigned_to("aws"));
        assert_eq!(updated.function_url.as_deref(), Some("https://d1.example.com"));

        assert!(matches!(
            store
                .upsert_deployment(&update, &AssignmentGuard::Unassigned)
                .await,
            Err(StoreError::ConditionFailed)
        ));
        assert!(matches!(
            store
                .upsert_deployment(&update, &AssignmentGuard::AssignedTo("okta".into()))
                .await,
            Err(StoreError::ConditionFailed)
        ));
        store
            .upsert_deployment(&update, &AssignmentGuard::AssignedTo("aws".into()))
            .await
            .unwrap();

        // New deployments never arrive pre-bound.
        let mut sneaky = deployment("d2");
        sneaky.target_group_assignment = Some(assignment("okta"));
        let created = store
            .upsert_deployment(&sneaky, &AssignmentGuard::Any)
            .await
            .unwrap();
        assert!(!created.is_assigned());
    }

    #[tokio::test]
    async fn clearing_frees_the_target_group() {
        let store = InMemoryStore::new();
        store
            .upsert_deployment(&deployment("d1"), &AssignmentGuard::Any)
            .await
            .unwrap();
        store
            .assign_deployment("d1", &ec2(), &assignment("aws"))
            .await
            .unwrap();

        assert!(store.clear_deployment_assignment("d1", "okta").await.is_err());
        let cleared = store.clear_deployment_assignment("d1", "aws").await.unwrap();
        assert!(!cleared.is_assigned());
        assert!(store
            .find_deployment_for_target_group("aws")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn preflight_claim_is_single_use_and_owner_scoped() {
        let store = InMemoryStore::new();
        let preflight = Preflight::new("alice", vec![], Utc::now());
        store.put_preflight(&preflight).await.unwrap();

        assert!(store
            .claim_preflight(&preflight.id, "bob", Utc::now())
            .await
            .unwrap()
            .is_none());
        assert!(store
            .claim_preflight(&preflight.id, "alice", Utc::now())
            .await
            .unwrap()
            .is_some());
        assert!(store
            .claim_preflight(&preflight.id, "alice", Utc::now())
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_preflight(&preflight.id, "alice")
            .await
            .unwrap()
            .is_none());
    }
}
