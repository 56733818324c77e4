//! Bluetooth Low Energy (BLE) collection of RuuviTag readings

use crate::sensors::ruuvi;
use crate::shared::{ForwardError, ReadingSet};
use btleplug::api::{Central, CentralEvent, Manager as BtManager, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager as BluetoothManager};
use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

/// Anything that can produce a set of readings for the given devices.
///
/// An empty `macs` slice means "every sensor in range".
#[allow(async_fn_in_trait)]
pub trait ReadingSource {
    async fn fetch(&self, macs: &[String], timeout: Duration) -> Result<ReadingSet, ForwardError>;
}

/// Passive scanner listening for Ruuvi advertisements on the first adapter
#[derive(Debug, Default)]
pub struct BleSource;

impl ReadingSource for BleSource {
    async fn fetch(&self, macs: &[String], timeout: Duration) -> Result<ReadingSet, ForwardError> {
        let manager = BluetoothManager::new().await?;

        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(ForwardError::NoAdapter)?;

        let adapter_info = adapter
            .adapter_info()
            .await
            .unwrap_or_else(|_| "Unknown adapter".to_string());
        tracing::debug!("Scanning on {} for {:?}", adapter_info, timeout);

        let wanted = wanted_set(macs);
        let mut events = adapter.events().await?;
        adapter.start_scan(ScanFilter::default()).await?;

        stop_after(
            collect(&adapter, &wanted, &mut events, timeout),
            adapter.stop_scan(),
        )
        .await
    }
}

/// Await `scan`, then `stop`, whether or not the scan failed
async fn stop_after<T>(
    scan: impl Future<Output = Result<T, ForwardError>>,
    stop: impl Future<Output = btleplug::Result<()>>,
) -> Result<T, ForwardError> {
    let result = scan.await;
    if let Err(e) = stop.await {
        tracing::debug!("Failed to stop scan: {}", e);
    }
    result
}

/// Listen until `timeout` elapses, keeping the latest reading per device
async fn collect(
    adapter: &Adapter,
    wanted: &HashSet<String>,
    events: &mut (impl Stream<Item = CentralEvent> + Unpin),
    timeout: Duration,
) -> Result<ReadingSet, ForwardError> {
    let mut readings = ReadingSet::new();

    // BlueZ reports only changes, so start from what the adapter already knows
    seed_from_known(adapter, wanted, &mut readings).await?;

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.next() => match event {
                Some(event) => record(adapter, wanted, event, &mut readings).await?,
                None => {
                    tracing::warn!("Bluetooth event stream ended early");
                    break;
                }
            },
        }
    }

    Ok(readings)
}

fn wanted_set(macs: &[String]) -> HashSet<String> {
    macs.iter().map(|mac| mac.to_uppercase()).collect()
}

fn is_wanted(wanted: &HashSet<String>, address: &str) -> bool {
    wanted.is_empty() || wanted.contains(&address.to_uppercase())
}

/// Decode one advertisement and keep it as the latest reading of its device
async fn record(
    adapter: &Adapter,
    wanted: &HashSet<String>,
    event: CentralEvent,
    readings: &mut ReadingSet,
) -> Result<(), ForwardError> {
    let CentralEvent::ManufacturerDataAdvertisement {
        id,
        manufacturer_data,
    } = event
    else {
        return Ok(());
    };

    let Some(payload) = manufacturer_data.get(&ruuvi::MANUFACTURER_ID) else {
        return Ok(());
    };

    let peripheral = match adapter.peripheral(&id).await {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!("Advertisement from unknown peripheral {:?}: {}", id, e);
            return Ok(());
        }
    };

    let address = peripheral.address().to_string();
    if !is_wanted(wanted, &address) {
        return Ok(());
    }

    let rssi = peripheral
        .properties()
        .await
        .ok()
        .flatten()
        .and_then(|p| p.rssi);

    store(readings, address, payload, rssi)
}

/// Readings from manufacturer data the adapter has cached for known peripherals
async fn seed_from_known(
    adapter: &Adapter,
    wanted: &HashSet<String>,
    readings: &mut ReadingSet,
) -> Result<(), ForwardError> {
    let peripherals = match adapter.peripherals().await {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!("Could not list known peripherals: {}", e);
            return Ok(());
        }
    };

    for peripheral in peripherals {
        let Some(properties) = peripheral.properties().await.ok().flatten() else {
            continue;
        };
        let Some(payload) = properties.manufacturer_data.get(&ruuvi::MANUFACTURER_ID) else {
            continue;
        };

        let address = properties.address.to_string();
        if is_wanted(wanted, &address) {
            store(readings, address, payload, properties.rssi)?;
        }
    }

    Ok(())
}

/// Decode `payload` and replace any earlier reading of `address`
fn store(
    readings: &mut ReadingSet,
    address: String,
    payload: &[u8],
    rssi: Option<i16>,
) -> Result<(), ForwardError> {
    let mut reading = match ruuvi::decode(payload) {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!("Skipping advertisement from {}: {}", address, e);
            return Ok(());
        }
    };
    reading.rssi = rssi;

    tracing::debug!("Reading from {}: {:?}", address, reading);
    readings.insert(address, serde_json::to_value(&reading)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_empty_filter_accepts_everything() {
        let wanted = wanted_set(&[]);
        assert!(is_wanted(&wanted, "CB:B8:33:4C:88:4F"));
    }

    #[test]
    fn test_filter_is_case_insensitive() {
        let wanted = wanted_set(&["cb:b8:33:4c:88:4f".to_string()]);
        assert!(is_wanted(&wanted, "CB:B8:33:4C:88:4F"));
        assert!(!is_wanted(&wanted, "D1:12:34:56:78:9A"));
    }

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    const RAWV2: &str = "0512FC5394C37C0004FFFC040CAC364200CDCBB8334C884F";
    const RAWV1: &str = "03291A1ECE1EFC18F94202CA0B53";

    #[test]
    fn test_store_keeps_latest_reading_with_rssi() {
        let mut readings = ReadingSet::new();
        let address = "CB:B8:33:4C:88:4F".to_string();

        store(&mut readings, address.clone(), &hex(RAWV1), Some(-80)).unwrap();
        assert_eq!(readings[&address]["data_format"], 3);

        store(&mut readings, address.clone(), &hex(RAWV2), Some(-62)).unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[&address]["data_format"], 5);
        assert_eq!(readings[&address]["measurement_sequence_number"], 205);
        assert_eq!(readings[&address]["rssi"], -62);
    }

    #[test]
    fn test_store_skips_undecodable_payload() {
        let mut readings = ReadingSet::new();
        store(&mut readings, "CB:B8:33:4C:88:4F".to_string(), &[0x05, 0x12], None).unwrap();
        assert!(readings.is_empty());
    }

    #[test]
    fn test_store_without_rssi_omits_field() {
        let mut readings = ReadingSet::new();
        store(&mut readings, "CB:B8:33:4C:88:4F".to_string(), &hex(RAWV2), None).unwrap();
        assert!(readings["CB:B8:33:4C:88:4F"].get("rssi").is_none());
    }

    #[tokio::test]
    async fn test_scan_is_stopped_when_collection_fails() {
        let stopped = AtomicBool::new(false);

        let result: Result<ReadingSet, _> = stop_after(
            async { Err(ForwardError::NoAdapter) },
            async {
                stopped.store(true, Ordering::SeqCst);
                Ok(())
            },
        )
        .await;

        assert!(matches!(result, Err(ForwardError::NoAdapter)));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stop_failure_keeps_readings() {
        let result = stop_after(async { Ok(ReadingSet::new()) }, async {
            Err(btleplug::Error::NotConnected)
        })
        .await;

        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn test_malformed_identifier_never_matches() {
        let wanted = wanted_set(&["not-a-mac".to_string()]);
        assert!(!is_wanted(&wanted, "CB:B8:33:4C:88:4F"));
    }
}
