use std::mem::size_of;

use driftdock_platform::{DisplayId, DisplayInfo, DisplayProvider, MonitorRect, Result};
use tracing::{debug, warn};
use windows::core::Error;
use windows::Win32::Foundation::{BOOL, LPARAM, RECT};
use windows::Win32::Graphics::Gdi::{
    EnumDisplayMonitors, GetMonitorInfoW, HDC, HMONITOR, MONITORINFO, MONITORINFOEXW,
};
use windows::Win32::UI::HiDpi::{GetDpiForMonitor, MDT_EFFECTIVE_DPI};

const MONITORINFOF_PRIMARY: u32 = 1;
const DEFAULT_DPI: u32 = 96;

/// Lists attached monitors keyed by their GDI device name (`\\.\DISPLAY1`),
/// which survives monitor handle churn across topology changes.
#[derive(Debug, Default)]
pub struct Win32Displays;

impl Win32Displays {
    pub fn new() -> Self {
        Self
    }
}

impl DisplayProvider for Win32Displays {
    fn displays(&self) -> Result<Vec<DisplayInfo>> {
        let displays = enumerate()?;
        debug!(
            "enumerated {} displays: {}",
            displays.len(),
            displays
                .iter()
                .map(|d| format!(
                    "[{} {}x{} @ ({}, {}) dpi {}{}]",
                    d.id,
                    d.rect.width,
                    d.rect.height,
                    d.rect.x,
                    d.rect.y,
                    d.rect.dpi,
                    if d.primary { " primary" } else { "" }
                ))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(displays)
    }
}

fn enumerate() -> Result<Vec<DisplayInfo>> {
    unsafe extern "system" fn enum_proc(
        hmonitor: HMONITOR,
        _hdc: HDC,
        _lprc: *mut RECT,
        lparam: LPARAM,
    ) -> BOOL {
        let data_ptr = lparam.0 as *mut Vec<DisplayInfo>;
        if data_ptr.is_null() {
            return BOOL(0);
        }
        let data = &mut *data_ptr;
        let mut info = MONITORINFOEXW::default();
        info.monitorInfo.cbSize = size_of::<MONITORINFOEXW>() as u32;
        if !GetMonitorInfoW(hmonitor, &mut info as *mut MONITORINFOEXW as *mut MONITORINFO).as_bool() {
            warn!("GetMonitorInfoW failed for monitor {:?}", hmonitor.0);
            return BOOL(1);
        }
        let rect = info.monitorInfo.rcMonitor;
        let mut dpi_x = DEFAULT_DPI;
        let mut dpi_y = DEFAULT_DPI;
        if let Err(err) = GetDpiForMonitor(hmonitor, MDT_EFFECTIVE_DPI, &mut dpi_x, &mut dpi_y) {
            warn!("GetDpiForMonitor failed for monitor {:?}: {err}", hmonitor.0);
            dpi_x = DEFAULT_DPI;
        }
        let name_len = info
            .szDevice
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(info.szDevice.len());
        let name = String::from_utf16_lossy(&info.szDevice[..name_len]);
        data.push(DisplayInfo {
            id: DisplayId(name),
            rect: MonitorRect {
                x: rect.left,
                y: rect.top,
                width: rect.right - rect.left,
                height: rect.bottom - rect.top,
                dpi: dpi_x,
            },
            primary: info.monitorInfo.dwFlags & MONITORINFOF_PRIMARY != 0,
        });
        BOOL(1)
    }

    let mut displays: Vec<DisplayInfo> = Vec::new();
    let lparam = LPARAM(&mut displays as *mut _ as isize);
    unsafe {
        if !EnumDisplayMonitors(None, None, Some(enum_proc), lparam).as_bool() {
            return Err(Error::from_win32().into());
        }
    }
    Ok(displays)
}
