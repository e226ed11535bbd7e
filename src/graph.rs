//! The flattened model graph.  An `AtomicModel` is a model's identity in
//! the graph: a name, its port lists, and a back-reference (by name) to
//! the coupled model it belongs to.  Connectors wire output ports to input
//! ports; the coupled-model influencer resolution is flattened in advance,
//! so routing one emission is a single scan over the connector list.

use serde::{Deserialize, Serialize};

/// The identity of one atomic model in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtomicModel {
    name: String,
    #[serde(default)]
    parent: String,
    #[serde(default)]
    ports_in: Vec<String>,
    #[serde(default)]
    ports_out: Vec<String>,
}

impl AtomicModel {
    pub fn new(name: &str, parent: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: parent.to_string(),
            ports_in: Vec::new(),
            ports_out: Vec::new(),
        }
    }

    pub fn with_ports(mut self, ports_in: &[&str], ports_out: &[&str]) -> Self {
        self.ports_in = ports_in.iter().map(|port| port.to_string()).collect();
        self.ports_out = ports_out.iter().map(|port| port.to_string()).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn ports_in(&self) -> &[String] {
        &self.ports_in
    }

    pub fn ports_out(&self) -> &[String] {
        &self.ports_out
    }

    pub fn has_input_port(&self, port_name: &str) -> bool {
        self.ports_in.iter().any(|port| port == port_name)
    }

    pub fn has_output_port(&self, port_name: &str) -> bool {
        self.ports_out.iter().any(|port| port == port_name)
    }
}

/// Connectors are configured to connect models through their ports.
/// During simulation, models exchange external events via these
/// connectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connector {
    id: String,
    #[serde(rename = "sourceID")]
    source_id: String,
    #[serde(rename = "targetID")]
    target_id: String,
    source_port: String,
    target_port: String,
}

impl Connector {
    pub fn new(
        id: String,
        source_id: String,
        target_id: String,
        source_port: String,
        target_port: String,
    ) -> Self {
        Self {
            id,
            source_id,
            target_id,
            source_port,
            target_port,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn source_port(&self) -> &str {
        &self.source_port
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn target_port(&self) -> &str {
        &self.target_port
    }
}

/// The routing table: immutable during a tick, mutated only through the
/// executive between transitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelGraph {
    connectors: Vec<Connector>,
}

impl ModelGraph {
    pub fn new(connectors: Vec<Connector>) -> Self {
        Self { connectors }
    }

    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    pub fn add_connector(&mut self, connector: Connector) {
        self.connectors.push(connector);
    }

    /// Removes every connector that references the given model, on either
    /// end.  Called when a model is deleted.
    pub fn del_model(&mut self, model_name: &str) {
        self.connectors
            .retain(|connector| {
                connector.source_id() != model_name && connector.target_id() != model_name
            });
    }

    /// Resolves the destination set for an emission: every
    /// `(target model, target port)` wired to the given source model and
    /// port.
    pub fn target_ports(&self, source_id: &str, source_port: &str) -> Vec<(String, String)> {
        self.connectors
            .iter()
            .filter_map(|connector| {
                if connector.source_id() == source_id && connector.source_port() == source_port {
                    Some((
                        connector.target_id().to_string(),
                        connector.target_port().to_string(),
                    ))
                } else {
                    None
                }
            })
            .collect()
    }
}
