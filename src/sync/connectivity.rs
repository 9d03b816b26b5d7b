//! Push-based connectivity status.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
  Offline,
  /// Online over a metered network
  Cellular,
  Wifi,
}

impl NetworkStatus {
  pub fn is_online(&self) -> bool {
    !matches!(self, NetworkStatus::Offline)
  }

  pub fn is_metered(&self) -> bool {
    matches!(self, NetworkStatus::Cellular)
  }
}

impl fmt::Display for NetworkStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      NetworkStatus::Offline => "offline",
      NetworkStatus::Cellular => "cellular",
      NetworkStatus::Wifi => "wifi",
    })
  }
}

/// Source of connectivity changes.
///
/// Implementations adapt a platform callback; subscribers see every change
/// pushed after they subscribe, starting from the current value.
pub trait ConnectivityMonitor: Send + Sync {
  fn current(&self) -> NetworkStatus;

  fn subscribe(&self) -> watch::Receiver<NetworkStatus>;
}

/// Monitor driven by explicit `set` calls.
///
/// Hosts feed it from their platform callback; tests flip it by hand.
#[derive(Debug)]
pub struct ManualConnectivity {
  tx: watch::Sender<NetworkStatus>,
}

impl ManualConnectivity {
  pub fn new(initial: NetworkStatus) -> Self {
    let (tx, _) = watch::channel(initial);
    Self { tx }
  }

  /// Publish a new status. Subscribers are only woken on an actual change.
  pub fn set(&self, status: NetworkStatus) {
    self.tx.send_if_modified(|current| {
      if *current == status {
        false
      } else {
        *current = status;
        true
      }
    });
  }
}

impl ConnectivityMonitor for ManualConnectivity {
  fn current(&self) -> NetworkStatus {
    *self.tx.borrow()
  }

  fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
    self.tx.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_subscribers_see_changes() {
    let monitor = ManualConnectivity::new(NetworkStatus::Offline);
    let mut rx = monitor.subscribe();
    assert!(!monitor.current().is_online());

    monitor.set(NetworkStatus::Wifi);
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), NetworkStatus::Wifi);
    assert!(monitor.current().is_online());
  }

  #[test]
  fn test_same_status_does_not_notify() {
    let monitor = ManualConnectivity::new(NetworkStatus::Cellular);
    let rx = monitor.subscribe();
    monitor.set(NetworkStatus::Cellular);
    assert!(!rx.has_changed().unwrap());
    assert!(monitor.current().is_metered());
  }
}
