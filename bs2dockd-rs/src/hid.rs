/* Raw hidraw access for the dock.
 *
 * Discovery goes through udev (hidraw nodes whose HID parent matches
 * the dock's vendor id), and the opened node is double-checked with
 * the `HIDIOCGRAWINFO` ioctl so a racing unplug/replug cannot hand us
 * a different device at the same path. */

use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use nix::libc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

use crate::device::{DockModel, PROBE_ORDER, VENDOR_ID};
use crate::error::DockError;
use crate::protocol::WRITE_REPORT_LEN;

/* Timeout for a single blocking read. Expiry is the idle case, not  */
/* an error.                                                          */
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/* Linux hidraw.h: `struct hidraw_devinfo`. */
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct HidrawDevInfo {
    bustype: u32,
    vendor: i16,
    product: i16,
}

/* Compute the `HIDIOCGRAWINFO` ioctl request number.             */
/*                                                                */
/* Linux hidraw.h: `_IOR('H', 0x03, struct hidraw_devinfo)`.      */
fn hid_raw_info_req() -> libc::c_ulong {
    let ioc_read: libc::c_ulong = 2;
    let ioc_type: libc::c_ulong = b'H' as libc::c_ulong;
    let ioc_nr: libc::c_ulong = 0x03;
    let size = std::mem::size_of::<HidrawDevInfo>() as libc::c_ulong;
    (ioc_read << 30) | (size << 16) | (ioc_type << 8) | ioc_nr
}

/* Enumerate hidraw nodes and return the devnode of the first dock    */
/* in probe order (PRO variant first).                                */
pub fn find_dock() -> Result<Option<(PathBuf, DockModel)>> {
    let mut enumerator = udev::Enumerator::new().context("Creating udev enumerator")?;
    enumerator
        .match_subsystem("hidraw")
        .context("Filtering udev enumeration to hidraw")?;

    let mut candidates: Vec<(u16, PathBuf)> = Vec::new();

    for device in enumerator.scan_devices().context("Scanning hidraw devices")? {
        let Some(devnode) = device.devnode() else {
            continue;
        };
        let Ok(Some(hid_parent)) = device.parent_with_subsystem("hid") else {
            continue;
        };
        let Some(hid_id) = hid_parent.property_value("HID_ID").and_then(|v| v.to_str()) else {
            continue;
        };

        /* HID_ID format: `0003:000037D7:00001002` (bus:vid:pid). */
        let mut parts = hid_id.split(':');
        let _bus = parts.next();
        let vid = parts
            .next()
            .and_then(|v| u32::from_str_radix(v, 16).ok())
            .map(|n| n as u16);
        let pid = parts
            .next()
            .and_then(|p| u32::from_str_radix(p, 16).ok())
            .map(|n| n as u16);

        let (Some(vid), Some(pid)) = (vid, pid) else {
            continue;
        };
        if vid != VENDOR_ID {
            continue;
        }

        trace!("hidraw candidate {:?} ({:04x}:{:04x})", devnode, vid, pid);
        candidates.push((pid, devnode.to_path_buf()));
    }

    for pid in PROBE_ORDER {
        if let Some((_, path)) = candidates.iter().find(|(p, _)| *p == pid) {
            if let Some(model) = DockModel::from_product_id(pid) {
                return Ok(Some((path.clone(), model)));
            }
        }
    }

    Ok(None)
}

/* The open hidraw handle. All raw reads and writes go through this   */
/* struct; nothing else in the daemon touches the file descriptor.    */
pub struct DockHandle {
    file: tokio::fs::File,
    path: PathBuf,
    pub model: DockModel,
}

impl DockHandle {
    pub async fn open(path: &Path, model: DockModel) -> Result<Self, DockError> {
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await
            .map_err(|_| DockError::DeviceOpenFailed)?;

        let handle = Self {
            file,
            path: path.to_path_buf(),
            model,
        };

        /* Confirm the node still belongs to the dock. */
        let (vendor, product) = handle.raw_info()?;
        if vendor != VENDOR_ID || DockModel::from_product_id(product) != Some(model) {
            debug!(
                "Rejecting {:?}: reports {:04x}:{:04x}",
                path, vendor, product
            );
            return Err(DockError::DeviceOpenFailed);
        }

        debug!("Opened {} at {:?}", model, path);
        Ok(handle)
    }

    /* Query vendor/product via `HIDIOCGRAWINFO`. */
    fn raw_info(&self) -> Result<(u16, u16), DockError> {
        let fd = self.file.as_raw_fd();
        let mut info = HidrawDevInfo::default();

        /* SAFETY: `fd` is a valid open file descriptor for the      */
        /* lifetime of this call, and `info` is a live, properly     */
        /* sized `hidraw_devinfo` the kernel fills in completely.    */
        let res = unsafe { libc::ioctl(fd, hid_raw_info_req(), &mut info) };

        if res < 0 {
            return Err(DockError::DeviceOpenFailed);
        }
        Ok((info.vendor as u16, info.product as u16))
    }

    /* Write a padded output report. */
    pub async fn write_report(&mut self, report: &[u8; WRITE_REPORT_LEN]) -> Result<(), DockError> {
        self.file
            .write_all(report)
            .await
            .map_err(|source| DockError::DeviceWriteFailed { source })?;
        debug!("TX {} bytes: {:02x?}", report.len(), report);
        Ok(())
    }

    /* Read one input report.                                         */
    /*                                                                */
    /* Returns `Ok(None)` when the read timeout expires with no data. */
    pub async fn read_report(&mut self, buf: &mut [u8]) -> Result<Option<usize>, DockError> {
        match tokio::time::timeout(READ_TIMEOUT, self.file.read(buf)).await {
            Ok(Ok(n)) => {
                trace!("RX {} bytes: {:02x?}", n, &buf[..n]);
                Ok(Some(n))
            }
            Ok(Err(source)) => Err(DockError::DeviceReadFailed { source }),
            Err(_elapsed) => Ok(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
