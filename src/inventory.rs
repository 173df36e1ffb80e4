//! Directory-side aggregation.
//!
//! Walks the group hierarchy once, then fans per-group vehicle fetches out
//! over a fixed-width worker pool fed by a pre-filled queue. Workers append
//! qualifying devices to a shared [`DeviceIndex`]; per-group failures are
//! logged and skipped, only the top-level group listing is fatal.

use crate::directory::{DirectoryClient, Group};
use crate::firmware;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Device class this service reconciles.
pub const TARGET_DEVICE_TYPE: &str = "laf";

/// Parent group name marking fleet groups.
const FLEET_PARENT: &str = "fleet";

/// Fleet groups excluded from aggregation (hardware test pools).
const EXCLUDED_GROUPS: [&str; 3] = ["la5.ic", "LA5.IC.HARDWARE", "Demo_batt"];

/// One device discovered in the directory, labelled with its group and the
/// model decoded from the vehicle preference blob.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub device_no: String,
    pub group_id: i64,
    pub group_names: Vec<String>,
    pub model: String,
    pub model_id: i64,
}

/// Shared sink the fetch workers append into. Locking is internal so the
/// workers only ever see `record()`.
#[derive(Debug, Default)]
pub struct DeviceIndex {
    entries: Mutex<Vec<DeviceInfo>>,
}

impl DeviceIndex {
    pub fn record(&self, info: DeviceInfo) {
        self.entries.lock().push(info);
    }

    pub fn into_entries(self) -> Vec<DeviceInfo> {
        self.entries.into_inner()
    }
}

/// True for groups that belong to the fleet and are not explicitly excluded.
fn eligible(group: &Group) -> bool {
    group.pname == FLEET_PARENT && !EXCLUDED_GROUPS.contains(&group.name.as_str())
}

/// Fetches the directory and returns every qualifying device.
///
/// The group listing itself is fatal on failure; each dispatched group is
/// then fetched independently and always completes exactly once, success or
/// failure, because completion is joining the worker pool.
pub async fn collect_devices(
    client: Arc<DirectoryClient>,
    token: &str,
    workers: usize,
) -> Result<Vec<DeviceInfo>> {
    let groups = client
        .get_my_groups(token)
        .await
        .context("fetching group list")?;
    let total = groups.len();

    let queue: VecDeque<Group> = groups.into_iter().filter(eligible).collect();
    info!(total, eligible = queue.len(), "dispatching group fetches");

    let queue = Arc::new(Mutex::new(queue));
    let index = Arc::new(DeviceIndex::default());

    let mut pool = JoinSet::new();
    for _ in 0..workers.max(1) {
        let client = Arc::clone(&client);
        let queue = Arc::clone(&queue);
        let index = Arc::clone(&index);
        let token = token.to_string();
        pool.spawn(async move {
            loop {
                let group = match queue.lock().pop_front() {
                    Some(group) => group,
                    None => break,
                };
                fetch_group(&client, &token, &group, &index).await;
            }
        });
    }
    while let Some(joined) = pool.join_next().await {
        // Worker tasks never panic on group failures; a join error here
        // would be a programming error.
        joined.context("group fetch worker panicked")?;
    }

    let index = Arc::try_unwrap(index)
        .map_err(|_| anyhow::anyhow!("device index still shared after pool join"))?;
    let entries = index.into_entries();
    info!(devices = entries.len(), "directory aggregation complete");
    Ok(entries)
}

/// Fetches one group's vehicles and records its qualifying devices.
async fn fetch_group(client: &DirectoryClient, token: &str, group: &Group, index: &DeviceIndex) {
    let vehicles = match client.get_my_vehicles(token, group.groupid).await {
        Ok(vehicles) => vehicles,
        Err(e) => {
            warn!(group = %group.name, groupid = group.groupid, error = %e,
                  "group fetch failed, skipping");
            return;
        }
    };

    let mut recorded = 0usize;
    for vehicle in &vehicles {
        if vehicle.vehicleno.is_empty() {
            continue;
        }
        let Some(primary) = vehicle.devices.first() else {
            continue;
        };
        if primary.devicetype != TARGET_DEVICE_TYPE {
            continue;
        }
        let pref = vehicle.vehicleprefdata.as_deref().unwrap_or_default();
        let (model, model_id) = firmware::decode_vehicle_pref(pref);
        index.record(DeviceInfo {
            device_no: primary.deviceno.clone(),
            group_id: group.groupid,
            group_names: vec![group.name.clone()],
            model,
            model_id,
        });
        recorded += 1;
    }
    debug!(group = %group.name, vehicles = vehicles.len(), recorded, "group fetched");
}
