use super::commands::CmsisDapDevice;
use super::CmsisDapFactory;
use crate::probe::{DebugProbeInfo, DebugProbeSelector, ProbeCreationError};
use hidapi::HidApi;
use rusb::{Direction, InterfaceDescriptor, TransferType, UsbContext};
use std::time::Duration;

/// Timeout for a single USB transfer until the probe reports its own settings.
pub(crate) const DEFAULT_USB_TIMEOUT: Duration = Duration::from_millis(100);

/// Report size of most v1 probes. The real one is queried after opening.
const DEFAULT_HID_REPORT_SIZE: usize = 64;

type UsbDevice = rusb::Device<rusb::Context>;
type UsbHandle = rusb::DeviceHandle<rusb::Context>;

/// Lists the CMSIS-DAP probes on the bus.
///
/// v2 probes are found through libusb. Reading their strings needs access to
/// the device, so probes libusb cannot open are picked up again through HID,
/// as long as they offer a v1 interface.
#[tracing::instrument(skip_all)]
pub fn list_cmsisdap_devices() -> Vec<DebugProbeInfo> {
    let mut probes: Vec<DebugProbeInfo> = match usb_devices() {
        Ok(devices) => devices.iter().filter_map(|d| usb_probe_info(&d)).collect(),
        Err(error) => {
            tracing::warn!(%error, "listing USB devices failed");
            vec![]
        }
    };
    tracing::debug!(count = probes.len(), "CMSIS-DAP probes found through libusb");

    let hid_probes = match HidApi::new() {
        Ok(api) => api.device_list().filter_map(hid_probe_info).collect(),
        Err(error) => {
            tracing::debug!(%error, "HID is not available");
            vec![]
        }
    };

    for info in hid_probes {
        let known = probes.iter().any(|probe| {
            (probe.vendor_id, probe.product_id, &probe.serial_number)
                == (info.vendor_id, info.product_id, &info.serial_number)
        });
        if !known {
            tracing::trace!(?info, "probe only reachable through HID");
            probes.push(info);
        }
    }

    probes
}

fn usb_devices() -> rusb::Result<rusb::DeviceList<rusb::Context>> {
    rusb::Context::new()?.devices()
}

/// The name of an interface, if it has one and it can be read.
fn interface_name(handle: &UsbHandle, interface: &InterfaceDescriptor<'_>) -> Option<String> {
    let index = interface.description_string_index()?;
    handle.read_string_descriptor_ascii(index).ok()
}

fn usb_probe_info(device: &UsbDevice) -> Option<DebugProbeInfo> {
    let descriptor = device.device_descriptor().ok()?;
    let handle = device.open().ok()?;

    let product = handle.read_product_string_ascii(&descriptor).ok()?;
    let serial_number = handle.read_serial_number_string_ascii(&descriptor).ok();

    // Some probes only carry the name on the interface, not on the device.
    let is_probe = is_cmsis_dap(&product)
        || device.config_descriptor(0).is_ok_and(|config| {
            config
                .interfaces()
                .flat_map(|interface| interface.descriptors())
                .filter_map(|interface| interface_name(&handle, &interface))
                .any(|name| is_cmsis_dap(&name))
        });

    is_probe.then(|| {
        DebugProbeInfo::new(
            product,
            descriptor.vendor_id(),
            descriptor.product_id(),
            serial_number,
            &CmsisDapFactory,
        )
    })
}

fn hid_probe_info(device: &hidapi::DeviceInfo) -> Option<DebugProbeInfo> {
    let product = device.product_string().unwrap_or_default();
    let path = device.path().to_str().unwrap_or_default();

    if !is_cmsis_dap(product) && !is_cmsis_dap(path) {
        return None;
    }

    tracing::trace!(
        path = ?device.path(),
        product,
        interface = device.interface_number(),
        "HID CMSIS-DAP device"
    );

    Some(DebugProbeInfo::new(
        product.to_owned(),
        device.vendor_id(),
        device.product_id(),
        device.serial_number().map(str::to_owned),
        &CmsisDapFactory,
    ))
}

/// Claims the bulk interface of a v2 probe.
///
/// DAPLink doesn't announce the WinUSB GUID the v2 protocol asks for, so the
/// interface is recognised by its name and a bulk OUT endpoint followed by a
/// bulk IN endpoint. A third endpoint is the optional SWO stream.
fn open_v2_device(device: &UsbDevice) -> Option<CmsisDapDevice> {
    let descriptor = device.device_descriptor().ok()?;
    let mut handle = device
        .open()
        .map_err(|error| tracing::debug!(%error, "opening the USB device failed"))
        .ok()?;
    let config = device.config_descriptor(0).ok()?;

    for interface in config.interfaces().flat_map(|i| i.descriptors()) {
        if !interface_name(&handle, &interface).is_some_and(|name| is_cmsis_dap(&name)) {
            continue;
        }

        let endpoints: Vec<_> = interface.endpoint_descriptors().collect();
        let [out_ep, in_ep, ..] = endpoints.as_slice() else {
            continue;
        };
        let bulk = |ep: &rusb::EndpointDescriptor<'_>, direction| {
            ep.transfer_type() == TransferType::Bulk && ep.direction() == direction
        };
        if endpoints.len() > 3 || !bulk(out_ep, Direction::Out) || !bulk(in_ep, Direction::In) {
            continue;
        }

        if let Err(error) = handle.claim_interface(interface.interface_number()) {
            tracing::debug!(
                interface = interface.interface_number(),
                %error,
                "claiming the interface failed"
            );
            continue;
        }

        tracing::debug!(
            "Opened {:04x}:{:04x} as CMSIS-DAP v2",
            descriptor.vendor_id(),
            descriptor.product_id()
        );
        return Some(CmsisDapDevice::V2 {
            out_ep: out_ep.address(),
            in_ep: in_ep.address(),
            max_packet_size: usize::from(in_ep.max_packet_size()),
            handle,
            timeout: DEFAULT_USB_TIMEOUT,
        });
    }

    None
}

/// The v2 interface of the probe matching `selector`, if libusb can open it.
fn open_v2_from_selector(selector: &DebugProbeSelector) -> Option<CmsisDapDevice> {
    let devices = usb_devices()
        .map_err(|error| tracing::debug!(%error, "listing USB devices failed"))
        .ok()?;

    devices.iter().find_map(|device| {
        let descriptor = device.device_descriptor().ok()?;
        // Reading the serial number opens the device, so VID and PID go first.
        if (descriptor.vendor_id(), descriptor.product_id())
            != (selector.vendor_id, selector.product_id)
        {
            return None;
        }

        let serial_number = device
            .open()
            .and_then(|handle| handle.read_serial_number_string_ascii(&descriptor))
            .ok();
        if !selector.matches(
            descriptor.vendor_id(),
            descriptor.product_id(),
            serial_number.as_deref(),
        ) {
            return None;
        }

        usb_probe_info(&device)?;
        open_v2_device(&device)
    })
}

/// Opens the probe matching `selector`, preferring the v2 interface over v1.
pub fn open_device_from_selector(
    selector: &DebugProbeSelector,
) -> Result<CmsisDapDevice, ProbeCreationError> {
    tracing::trace!(%selector, "opening CMSIS-DAP probe");

    if let Some(device) = open_v2_from_selector(selector) {
        device.drain();
        return Ok(device);
    }

    tracing::debug!(%selector, "no v2 interface, trying CMSIS-DAP v1");

    let hid_api = HidApi::new()?;
    let device = hid_api
        .device_list()
        .find(|info| selector.matches(info.vendor_id(), info.product_id(), info.serial_number()))
        .ok_or(ProbeCreationError::NotFound)?
        .open_device(&hid_api)
        .map_err(|_| ProbeCreationError::CouldNotOpen)?;

    // A HID device which isn't a probe is left for other drivers.
    match device.get_product_string() {
        Ok(Some(product)) if is_cmsis_dap(&product) => {
            let device = CmsisDapDevice::V1 {
                handle: device,
                report_size: DEFAULT_HID_REPORT_SIZE,
                timeout: DEFAULT_USB_TIMEOUT,
            };
            device.drain();
            Ok(device)
        }
        _ => Err(ProbeCreationError::NotFound),
    }
}

/// Check if the given string looks like the name of a CMSIS-DAP probe or interface.
pub(crate) fn is_cmsis_dap(id: &str) -> bool {
    id.contains("CMSIS-DAP") || id.contains("CMSIS_DAP")
}

#[cfg(test)]
mod test {
    use super::is_cmsis_dap;
    use test_case::test_case;

    #[test_case("DAPLink CMSIS-DAP", true)]
    #[test_case("MCU-LINK CMSIS_DAP V3.128", true)]
    #[test_case("ST-Link Debug", false)]
    fn recognises_cmsis_dap_names(name: &str, expected: bool) {
        assert_eq!(is_cmsis_dap(name), expected);
    }
}
