// BLE central: talks to a DataPipe peripheral from the host
//
// Writes are framed with the same FramePlan the peripheral uses; inbound
// indications/notifications are fed through a Reassembler and Dispatcher.

use anyhow::{Context, Result};
use btleplug::api::{
    Central as _, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use datapipe_core::{DispatchOutcome, Dispatcher, FramePlan, Message, Reassembler, ThrottlePolicy};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::Config;

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await.context("Bluetooth manager unavailable")?;
    let adapters = manager.adapters().await.context("Failed to list adapters")?;
    adapters
        .into_iter()
        .next()
        .context("No Bluetooth adapter found")
}

/// Scan for a peripheral advertising `service`, optionally narrowed by a
/// name/address fragment
pub async fn find_device(
    adapter: &Adapter,
    target: Option<&str>,
    service: Uuid,
    scan: Duration,
) -> Result<Peripheral> {
    adapter
        .start_scan(ScanFilter {
            services: vec![service],
        })
        .await
        .context("Failed to start scan")?;
    tokio::time::sleep(scan).await;

    let peripherals = adapter.peripherals().await?;
    let mut found = None;

    for peripheral in peripherals {
        let Some(props) = peripheral.properties().await? else {
            continue;
        };
        let name = props.local_name.unwrap_or_default();
        let address = peripheral.address().to_string();

        let matches = match target {
            Some(t) => name.contains(t) || address.contains(t),
            None => props.services.contains(&service),
        };
        debug!("Seen '{}' ({}), match={}", name, address, matches);

        if matches {
            info!("Found '{}' ({})", name, address);
            found = Some(peripheral);
            break;
        }
    }

    adapter.stop_scan().await?;
    found.context("No DataPipe device found")
}

pub struct PipeCentral {
    device: Peripheral,
    characteristic: Characteristic,
    write_mtu: u16,
    throttle: ThrottlePolicy,
}

impl PipeCentral {
    /// Scan, connect and subscribe to the pipe characteristic
    pub async fn connect(config: &Config, target: Option<&str>) -> Result<Self> {
        let adapter = get_adapter().await?;
        let target = target.or(config.central.target.as_deref());
        let device = find_device(
            &adapter,
            target,
            config.pipe.service_uuid,
            Duration::from_secs(config.central.scan_secs),
        )
        .await?;

        device.connect().await.context("Connect failed")?;
        device
            .discover_services()
            .await
            .context("Service discovery failed")?;

        let characteristic = device
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == config.pipe.characteristic_uuid)
            .context("DataPipe characteristic not found")?;

        if characteristic
            .properties
            .intersects(CharPropFlags::INDICATE | CharPropFlags::NOTIFY)
        {
            device
                .subscribe(&characteristic)
                .await
                .context("Subscribe failed")?;
        } else {
            warn!("Characteristic supports neither indicate nor notify");
        }

        Ok(Self {
            device,
            characteristic,
            write_mtu: config.central.write_mtu,
            throttle: config.pipe.throttle.clone(),
        })
    }

    /// Frame and write `message`. With `confirmed`, every frame is a write
    /// with response; otherwise frames are paced like peripheral notifies.
    pub async fn send(&self, message: &Message, confirmed: bool) -> Result<usize> {
        let plan = FramePlan::new(message, self.write_mtu)
            .with_context(|| format!("MTU {} cannot carry a header", self.write_mtu))?;
        let total = plan.frame_count();
        let (write_type, delay) = if confirmed {
            (WriteType::WithResponse, Duration::ZERO)
        } else {
            (WriteType::WithoutResponse, self.throttle.delay_for(total))
        };

        for (index, frame) in plan.frames().enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            trace!("TX frame {}/{}: {}", index + 1, total, hex::encode(frame));
            self.device
                .write(&self.characteristic, frame, write_type)
                .await
                .with_context(|| format!("Write failed after {}/{} frames", index, total))?;
        }

        debug!("Wrote {} bytes in {} frame(s)", plan.total_len(), total);
        Ok(total)
    }

    /// Feed incoming values to `dispatcher` until `limit` messages have been
    /// dispatched, the link drops, or Ctrl-C
    pub async fn listen(&self, dispatcher: &mut Dispatcher, limit: Option<usize>) -> Result<usize> {
        let mut stream = self.device.notifications().await?;
        let mut rx = Reassembler::default();
        let mut handled = 0;

        loop {
            tokio::select! {
                next = stream.next() => {
                    let Some(notification) = next else {
                        info!("Notification stream closed");
                        break;
                    };
                    if notification.uuid != self.characteristic.uuid {
                        continue;
                    }
                    for message in rx.push(&notification.value) {
                        if dispatcher.dispatch(message) != DispatchOutcome::Dropped {
                            handled += 1;
                        }
                    }
                    if limit.is_some_and(|n| handled >= n) {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
            }
        }

        Ok(handled)
    }

    pub async fn disconnect(self) -> Result<()> {
        if self.device.is_connected().await.unwrap_or(false) {
            self.device.disconnect().await?;
        }
        Ok(())
    }
}
