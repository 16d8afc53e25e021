//! Registers slices and their access rules with a flow-space controller.
//!
//! Each rule becomes one flowspace entry per switch admitted by its scope.

use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utils::cmd_helper::{get_command_output, get_command_str, CommandError};

use crate::slice::{AccessRule, Permissions, Slice, SliceRegistry};
use crate::topology::{Dpid, Topology};
use crate::QueueId;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("{0}")]
    Command(#[from] CommandError),
    #[error("slice {0} rejected: {1}")]
    Rejected(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSpaceEntry {
    pub name: String,
    pub dpid: Dpid,
    pub priority: u32,
    pub match_str: String,
    pub queue_id: QueueId,
    pub slice: String,
    pub permissions: Permissions,
}

impl FlowSpaceEntry {
    fn new(slice: &Slice, rule: &AccessRule, switch: &str, dpid: Dpid) -> Self {
        FlowSpaceEntry {
            name: format!("{}-{}-{}", slice.name, rule.name, switch),
            dpid,
            priority: rule.priority,
            match_str: rule.match_str.clone(),
            queue_id: rule.queue_id,
            slice: slice.name.clone(),
            permissions: rule.permissions,
        }
    }
}

pub trait FlowSpaceController {
    fn add_slice(&mut self, slice: &Slice) -> Result<(), ControllerError>;
    fn add_flowspace(&mut self, entry: &FlowSpaceEntry) -> Result<(), ControllerError>;

    /// Create every slice on the controller, then push its flowspace. Stops
    /// at the first error. Returns the number of flowspace entries installed.
    fn install_rules(
        &mut self,
        topo: &Topology,
        slices: &SliceRegistry,
    ) -> Result<usize, ControllerError> {
        for slice in slices.all_slices() {
            self.add_slice(slice)?;
        }
        let entries = flowspace_entries(topo, slices);
        for entry in &entries {
            self.add_flowspace(entry)?;
        }
        log::info!(
            "installed {} flowspace entries for {} slices",
            entries.len(),
            slices.len()
        );
        Ok(entries.len())
    }
}

/// All flowspace entries for the registered slices, slice by slice in
/// registration order, then rule, then switch.
pub fn flowspace_entries(topo: &Topology, slices: &SliceRegistry) -> Vec<FlowSpaceEntry> {
    let switches: Vec<_> = topo
        .all_nodes()
        .filter_map(|ix| {
            let node = &topo[ix];
            node.dpid.map(|dpid| (node.name.as_str(), dpid, topo.is_edge_switch(ix)))
        })
        .collect();

    let mut entries = Vec::new();
    for slice in slices.all_slices() {
        for rule in &slice.rules {
            for &(name, dpid, is_edge) in &switches {
                if rule.scope.admits(is_edge) {
                    entries.push(FlowSpaceEntry::new(slice, rule, name, dpid));
                }
            }
        }
    }
    entries
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// fvctl admin password file
    pub passwd_file: PathBuf,
    /// password given to every new slice
    #[serde(default = "default_slice_password")]
    pub slice_password: String,
}

fn default_slice_password() -> String {
    "slicenet".to_owned()
}

/// Talks to FlowVisor through `fvctl`.
#[derive(Debug, Clone)]
pub struct FvctlController {
    config: ControllerConfig,
}

impl FvctlController {
    pub fn new(config: ControllerConfig) -> Self {
        FvctlController { config }
    }

    fn fvctl(&self) -> Command {
        let mut cmd = Command::new("fvctl");
        cmd.arg("-f").arg(&self.config.passwd_file);
        cmd
    }

    fn add_slice_cmd(&self, slice: &Slice) -> Command {
        let mut cmd = self.fvctl();
        cmd.arg("add-slice")
            .arg(format!("--password={}", self.config.slice_password))
            .arg(&slice.name)
            .arg(slice.controller.to_string())
            .arg(&slice.email);
        cmd
    }

    fn add_flowspace_cmd(&self, entry: &FlowSpaceEntry) -> Command {
        let mut cmd = self.fvctl();
        cmd.arg("add-flowspace")
            .arg("-q")
            .arg(entry.queue_id.to_string())
            .arg("-f")
            .arg(entry.queue_id.to_string())
            .arg(&entry.name)
            .arg(entry.dpid.to_string())
            .arg(entry.priority.to_string())
            .arg(&entry.match_str)
            .arg(format!("{}={}", entry.slice, entry.permissions));
        cmd
    }
}

impl FlowSpaceController for FvctlController {
    fn add_slice(&mut self, slice: &Slice) -> Result<(), ControllerError> {
        let out = get_command_output(self.add_slice_cmd(slice))?;
        if out.contains("Error") {
            return Err(ControllerError::Rejected(slice.name.clone(), out.trim().to_owned()));
        }
        log::info!("controller: added slice {} -> {}", slice.name, slice.controller);
        Ok(())
    }

    fn add_flowspace(&mut self, entry: &FlowSpaceEntry) -> Result<(), ControllerError> {
        let cmd = self.add_flowspace_cmd(entry);
        log::debug!("{}", get_command_str(&cmd));
        let out = get_command_output(cmd)?;
        if out.contains("Error") {
            return Err(ControllerError::Rejected(entry.slice.clone(), out.trim().to_owned()));
        }
        Ok(())
    }
}
