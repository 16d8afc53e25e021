use std::process::Command;

use thiserror::Error;
use utils::cmd_helper::{get_command_output, CommandError};

use crate::bandwidth::{Bandwidth, BandwidthTrait};
use crate::QueueId;

#[derive(Error, Debug)]
pub enum ShaperError {
    #[error("{0}")]
    Command(#[from] CommandError),
    #[error("interface {0} is down")]
    InterfaceDown(String),
}

/// Per-interface queue rate limiting. Setting the same rate twice must be
/// harmless.
pub trait TrafficShaper {
    fn set_rate(&self, iface: &str, queue_id: QueueId, rate: Bandwidth) -> Result<(), ShaperError>;

    /// Prepare `iface` to carry the given queues, each capped at its rate,
    /// under a total of `max_rate`.
    fn install_queues(
        &self,
        _iface: &str,
        _max_rate: Bandwidth,
        _queues: &[(QueueId, Bandwidth)],
    ) -> Result<(), ShaperError> {
        Ok(())
    }
}

/// The htb class every queue class hangs off.
const ROOT_CLASS: &str = "1:ffff";

/// Drives linux `tc` with an htb hierarchy: one class `1:<queue>` per queue
/// under a root class capped at the interface maximum. All commands use
/// `replace`, so repeating a call is a no-op.
///
/// `set_rate` puts the root qdisc and root class in place before touching
/// the queue class, so it works on interfaces that never saw
/// `install_queues`.
#[derive(Debug, Clone)]
pub struct TcShaper {
    sudo: bool,
    root_rate: Bandwidth,
}

impl TcShaper {
    pub fn new(sudo: bool) -> Self {
        TcShaper {
            sudo,
            root_rate: 10.gbps(),
        }
    }

    /// Cap of the root class created by `set_rate`.
    pub fn with_root_rate(mut self, root_rate: Bandwidth) -> Self {
        self.root_rate = root_rate;
        self
    }

    fn tc(&self) -> Command {
        if self.sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("tc");
            cmd
        } else {
            Command::new("tc")
        }
    }

    fn run(&self, args: &[String]) -> Result<(), ShaperError> {
        let mut cmd = self.tc();
        cmd.args(args);
        get_command_output(cmd)?;
        Ok(())
    }

    fn root_args(iface: &str, max_rate: Bandwidth) -> Vec<Vec<String>> {
        let max = format!("{}bit", max_rate.val());
        let qdisc = ["qdisc", "replace", "dev", iface, "root", "handle", "1:", "htb"];
        let class = [
            "class", "replace", "dev", iface, "parent", "1:", "classid", ROOT_CLASS, "htb",
            "rate", max.as_str(), "ceil", max.as_str(),
        ];
        vec![
            qdisc.iter().map(|s| s.to_string()).collect(),
            class.iter().map(|s| s.to_string()).collect(),
        ]
    }

    fn class_args(
        iface: &str,
        queue_id: QueueId,
        rate: Bandwidth,
        ceil: Bandwidth,
    ) -> Vec<String> {
        vec![
            "class".to_owned(),
            "replace".to_owned(),
            "dev".to_owned(),
            iface.to_owned(),
            "parent".to_owned(),
            ROOT_CLASS.to_owned(),
            "classid".to_owned(),
            format!("1:{:x}", queue_id),
            "htb".to_owned(),
            "rate".to_owned(),
            format!("{}bit", rate.val()),
            "ceil".to_owned(),
            format!("{}bit", ceil.val()),
        ]
    }

    fn set_rate_args(&self, iface: &str, queue_id: QueueId, rate: Bandwidth) -> Vec<Vec<String>> {
        let mut cmds = Self::root_args(iface, self.root_rate);
        cmds.push(Self::class_args(iface, queue_id, rate, rate));
        cmds
    }
}

impl TrafficShaper for TcShaper {
    fn set_rate(&self, iface: &str, queue_id: QueueId, rate: Bandwidth) -> Result<(), ShaperError> {
        for args in self.set_rate_args(iface, queue_id, rate) {
            self.run(&args)?;
        }
        Ok(())
    }

    fn install_queues(
        &self,
        iface: &str,
        max_rate: Bandwidth,
        queues: &[(QueueId, Bandwidth)],
    ) -> Result<(), ShaperError> {
        for args in Self::root_args(iface, max_rate) {
            self.run(&args)?;
        }
        for &(queue_id, cap) in queues {
            self.run(&Self::class_args(iface, queue_id, cap, cap))?;
        }
        Ok(())
    }
}

/// Logs what it would do and always succeeds.
#[derive(Debug, Clone, Default)]
pub struct DryRunShaper;

impl TrafficShaper for DryRunShaper {
    fn set_rate(&self, iface: &str, queue_id: QueueId, rate: Bandwidth) -> Result<(), ShaperError> {
        log::info!("dry-run: {} queue {} rate {}", iface, queue_id, rate);
        Ok(())
    }

    fn install_queues(
        &self,
        iface: &str,
        max_rate: Bandwidth,
        queues: &[(QueueId, Bandwidth)],
    ) -> Result<(), ShaperError> {
        log::info!("dry-run: {} root {} queues {:?}", iface, max_rate, queues);
        Ok(())
    }
}
