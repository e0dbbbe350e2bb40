// Refresh engine.
//
// One code path turns "this entity may be stale" into at most one
// in-flight conditional GET, no matter how many tasks ask at once.

use std::sync::Arc;

use hubkit_api::{ApiRequest, CancellationToken};
use tracing::debug;

use crate::error::Error;
use crate::session::SessionInner;
use crate::store::properties::PropertyBag;

/// An entity whose properties can be (re)loaded from its API resource.
pub(crate) trait Refreshable: Send + Sync {
    /// The owning session, if it is still alive.
    fn session(&self) -> Result<Arc<SessionInner>, Error>;

    /// The bag holding this entity's properties and refresh state.
    fn bag(&self) -> &PropertyBag;

    /// API path of the resource backing this entity.
    fn resource_path(&self) -> String;

    /// Map a response payload onto the entity's properties.
    fn apply(&self, data: &serde_json::Value) -> Result<(), Error>;
}

/// Refresh an entity, collapsing concurrent callers into one request.
///
/// The "wanted" flag is raised before waiting on the gate. Whoever
/// holds the gate finds it raised, performs the conditional GET, and
/// lowers it on success; a waiter that acquires the gate with the flag
/// already lowered was satisfied by the refresh it waited behind and
/// returns without touching the network.
pub(crate) async fn refresh_entity(
    entity: &dyn Refreshable,
    cancellation: &CancellationToken,
) -> Result<(), Error> {
    let bag = entity.bag();
    bag.request_refresh();

    let _gate = tokio::select! {
        guard = bag.gate().lock() => guard,
        () = cancellation.cancelled() => return Err(hubkit_api::Error::Cancelled.into()),
    };

    if !bag.refresh_wanted() {
        return Ok(());
    }

    let session = entity.session()?;
    let path = entity.resource_path();
    let freshness = bag.freshness();
    let request = ApiRequest::conditional(
        session.client.url(&path)?,
        freshness.etag,
        freshness.last_modified,
    );

    let response = session.client.get(&request, cancellation).await?;
    if response.changed {
        bag.set_freshness(response.etag.clone(), response.last_modified);
        let body = response
            .body
            .as_ref()
            .ok_or_else(|| Error::data("refresh response had an empty body", &serde_json::Value::Null))?;
        entity.apply(body)?;
    }

    bag.refresh_done();
    Ok(())
}

/// Kick off a refresh in the background, for property reads that find
/// the bag unpopulated. Failures are logged and dropped; the read that
/// triggered the refresh already returned `None`.
pub(crate) fn spawn_refresh<E>(entity: Arc<E>)
where
    E: Refreshable + 'static,
{
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        debug!("no async runtime available, skipping background refresh");
        return;
    };
    handle.spawn(async move {
        let cancellation = CancellationToken::new();
        if let Err(error) = refresh_entity(entity.as_ref(), &cancellation).await {
            debug!(%error, "background refresh failed");
        }
    });
}
