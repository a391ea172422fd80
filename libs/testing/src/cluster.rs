//! An in-memory cluster API.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use csi_lvm_cluster::{
    ClusterError, ExecutionUnitSpec, ExecutionUnits, NodeCondition, NodeEvent, Nodes, UnitPhase,
};

#[derive(Debug, Default)]
struct State {
    nodes: BTreeSet<String>,
    live: BTreeMap<(String, String), ExecutionUnitSpec>,
    created: Vec<ExecutionUnitSpec>,
    deleted: Vec<String>,
    phases: HashMap<String, VecDeque<UnitPhase>>,
    logs: HashMap<String, String>,
    events: Vec<NodeEvent>,
    conditions: Vec<(String, NodeCondition)>,
    cordoned: BTreeSet<String>,
    reject_creates: bool,
    reject_conditions: bool,
}

/// Records every call and answers unit phases from a per-unit script.
///
/// A unit without a script reports `Succeeded`. The last scripted phase
/// repeats once the script is exhausted.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(self, name: &str) -> Self {
        self.state.lock().unwrap().nodes.insert(name.to_string());
        self
    }

    pub fn remove_node(&self, name: &str) {
        self.state.lock().unwrap().nodes.remove(name);
    }

    /// Phases reported for unit `name`, in order.
    pub fn script_phases(&self, name: &str, phases: &[UnitPhase]) {
        self.state
            .lock()
            .unwrap()
            .phases
            .insert(name.to_string(), phases.iter().copied().collect());
    }

    pub fn set_logs(&self, name: &str, logs: &str) {
        self.state
            .lock()
            .unwrap()
            .logs
            .insert(name.to_string(), logs.to_string());
    }

    /// Answer unit creation with a server error.
    pub fn reject_creates(&self, reject: bool) {
        self.state.lock().unwrap().reject_creates = reject;
    }

    /// Answer condition writes with a server error.
    pub fn reject_conditions(&self, reject: bool) {
        self.state.lock().unwrap().reject_conditions = reject;
    }

    /// Every unit ever submitted, in order.
    pub fn created_units(&self) -> Vec<ExecutionUnitSpec> {
        self.state.lock().unwrap().created.clone()
    }

    /// Names of units currently present.
    pub fn live_units(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .live
            .keys()
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn deleted_units(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn events(&self) -> Vec<NodeEvent> {
        self.state.lock().unwrap().events.clone()
    }

    /// Condition writes as `(node, condition)`, in order.
    pub fn conditions(&self) -> Vec<(String, NodeCondition)> {
        self.state.lock().unwrap().conditions.clone()
    }

    pub fn is_cordoned(&self, node: &str) -> bool {
        self.state.lock().unwrap().cordoned.contains(node)
    }
}

fn unit_not_found(name: &str) -> ClusterError {
    ClusterError::NotFound {
        kind: "pod",
        name: name.to_string(),
    }
}

#[async_trait]
impl ExecutionUnits for FakeCluster {
    async fn create_unit(&self, spec: &ExecutionUnitSpec) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.reject_creates {
            return Err(ClusterError::Api {
                status: 500,
                message: "create rejected".to_string(),
            });
        }
        let key = (spec.namespace.clone(), spec.name.clone());
        if state.live.contains_key(&key) {
            return Err(ClusterError::AlreadyExists {
                kind: "pod",
                name: spec.name.clone(),
            });
        }
        state.created.push(spec.clone());
        state.live.insert(key, spec.clone());
        Ok(())
    }

    async fn unit_phase(&self, namespace: &str, name: &str) -> Result<UnitPhase, ClusterError> {
        let mut state = self.state.lock().unwrap();
        if !state
            .live
            .contains_key(&(namespace.to_string(), name.to_string()))
        {
            return Err(unit_not_found(name));
        }
        let phase = match state.phases.get_mut(name) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().copied(),
            None => None,
        };
        Ok(phase.unwrap_or(UnitPhase::Succeeded))
    }

    async fn unit_logs(
        &self,
        _namespace: &str,
        name: &str,
        _container: &str,
    ) -> Result<String, ClusterError> {
        let state = self.state.lock().unwrap();
        state
            .logs
            .get(name)
            .cloned()
            .ok_or_else(|| unit_not_found(name))
    }

    async fn delete_unit(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        match state.live.remove(&(namespace.to_string(), name.to_string())) {
            Some(_) => {
                state.deleted.push(name.to_string());
                Ok(())
            }
            None => Err(unit_not_found(name)),
        }
    }
}

#[async_trait]
impl Nodes for FakeCluster {
    async fn node_exists(&self, name: &str) -> Result<bool, ClusterError> {
        Ok(self.state.lock().unwrap().nodes.contains(name))
    }

    async fn cordon(&self, name: &str) -> Result<(), ClusterError> {
        self.state.lock().unwrap().cordoned.insert(name.to_string());
        Ok(())
    }

    async fn set_condition(
        &self,
        name: &str,
        condition: &NodeCondition,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.reject_conditions {
            return Err(ClusterError::Api {
                status: 500,
                message: "status update rejected".to_string(),
            });
        }
        state
            .conditions
            .push((name.to_string(), condition.clone()));
        Ok(())
    }

    async fn record_event(&self, event: &NodeEvent) -> Result<(), ClusterError> {
        self.state.lock().unwrap().events.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use csi_lvm_cluster::{PullPolicy, Resources};

    use super::*;

    fn unit(name: &str) -> ExecutionUnitSpec {
        ExecutionUnitSpec {
            name: name.to_string(),
            namespace: "csi-lvm".to_string(),
            node_name: "node-a".to_string(),
            container_name: "csi-lvm-create".to_string(),
            image: "img".to_string(),
            pull_policy: PullPolicy::Always,
            args: vec![],
            privileged: true,
            host_mounts: vec![],
            resources: Resources::default(),
        }
    }

    #[tokio::test]
    async fn scripted_phases_advance_and_stick() {
        let cluster = FakeCluster::new();
        cluster.create_unit(&unit("create-pvc-1")).await.unwrap();
        cluster.script_phases("create-pvc-1", &[UnitPhase::Pending, UnitPhase::Failed]);

        let phase = |c: FakeCluster| async move { c.unit_phase("csi-lvm", "create-pvc-1").await.unwrap() };
        assert_eq!(phase(cluster.clone()).await, UnitPhase::Pending);
        assert_eq!(phase(cluster.clone()).await, UnitPhase::Failed);
        assert_eq!(phase(cluster.clone()).await, UnitPhase::Failed);
    }

    #[tokio::test]
    async fn duplicate_unit_is_rejected() {
        let cluster = FakeCluster::new();
        cluster.create_unit(&unit("create-pvc-1")).await.unwrap();
        let err = cluster.create_unit(&unit("create-pvc-1")).await.unwrap_err();
        assert!(err.is_already_exists());

        cluster.delete_unit("csi-lvm", "create-pvc-1").await.unwrap();
        assert!(cluster.live_units().is_empty());
        assert_eq!(cluster.deleted_units(), vec!["create-pvc-1".to_string()]);
    }
}
