use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::device::value::RawValue;

#[derive(Debug)]
pub enum Command {
    Move {
        device: String,
        target: RawValue,
        wait: bool,
        resp: oneshot::Sender<Result<Value>>,
    },
    Read {
        device: String,
        maxage: Duration,
        resp: oneshot::Sender<Result<Value>>,
    },
    Status {
        device: String,
        maxage: Duration,
        resp: oneshot::Sender<Result<Value>>,
    },
    IsAllowed {
        device: String,
        target: RawValue,
        resp: oneshot::Sender<Result<Value>>,
    },
    Stop {
        device: String,
        resp: oneshot::Sender<Result<Value>>,
    },
    Reset {
        device: String,
        resp: oneshot::Sender<Result<Value>>,
    },
    Wait {
        device: String,
        resp: oneshot::Sender<Result<Value>>,
    },
    ListDevices {
        resp: oneshot::Sender<Result<Value>>,
    },
}
