// Picks the device serial an operation targets
use super::error::{AdbError, AdbResult};
use super::types::DeviceRecord;
use log::debug;

/// Anything that can produce a fresh device listing.
#[allow(async_fn_in_trait)]
pub trait DeviceSource {
    async fn list_devices(&self) -> AdbResult<Vec<DeviceRecord>>;
}

/// Precedence: `explicit`, then `configured`, then the first serial of a
/// fresh listing from `source`. Empty strings count as absent. The listing
/// is only requested when neither serial is given.
pub async fn resolve<D: DeviceSource>(
    explicit: Option<&str>,
    configured: Option<&str>,
    source: &D,
) -> AdbResult<String> {
    if let Some(serial) = explicit.filter(|s| !s.is_empty()) {
        debug!("Using explicit device serial {serial}");
        return Ok(serial.to_string());
    }
    if let Some(serial) = configured.filter(|s| !s.is_empty()) {
        debug!("Using configured device serial {serial}");
        return Ok(serial.to_string());
    }

    let devices = source.list_devices().await?;
    let serial = devices
        .into_iter()
        .map(|device| device.serial)
        .find(|serial| !serial.is_empty())
        .ok_or(AdbError::NoDeviceFound)?;
    debug!("Using first listed device {serial}");
    Ok(serial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FixedListing {
        devices: Vec<DeviceRecord>,
        queries: Cell<u32>,
    }

    impl FixedListing {
        fn new(serials: &[&str]) -> Self {
            Self {
                devices: serials
                    .iter()
                    .map(|s| DeviceRecord {
                        serial: s.to_string(),
                        state: "device".to_string(),
                    })
                    .collect(),
                queries: Cell::new(0),
            }
        }
    }

    impl DeviceSource for FixedListing {
        async fn list_devices(&self) -> AdbResult<Vec<DeviceRecord>> {
            self.queries.set(self.queries.get() + 1);
            Ok(self.devices.clone())
        }
    }

    #[tokio::test]
    async fn explicit_serial_wins_without_listing() {
        let source = FixedListing::new(&["emulator-5554"]);
        let serial = resolve(Some("R58M12"), Some("configured"), &source)
            .await
            .unwrap();
        assert_eq!(serial, "R58M12");
        assert_eq!(source.queries.get(), 0);
    }

    #[tokio::test]
    async fn configured_serial_beats_listing() {
        let source = FixedListing::new(&["emulator-5554"]);
        let serial = resolve(None, Some("configured"), &source).await.unwrap();
        assert_eq!(serial, "configured");
        assert_eq!(source.queries.get(), 0);
    }

    #[tokio::test]
    async fn falls_back_to_first_listed_device() {
        let source = FixedListing::new(&["emulator-5554", "R58M12"]);
        let serial = resolve(Some(""), Some(""), &source).await.unwrap();
        assert_eq!(serial, "emulator-5554");
        assert_eq!(source.queries.get(), 1);
    }

    #[tokio::test]
    async fn empty_listing_is_no_device_found() {
        let source = FixedListing::new(&[]);
        let err = resolve(None, None, &source).await.unwrap_err();
        assert!(matches!(err, AdbError::NoDeviceFound));
    }
}
