//! Windows service manager glue.
//!
//! The process arguments configure the service; the service manager only
//! supplies the service name.

use crate::cli::Args;
use anyhow::{anyhow, Result};
use std::ffi::c_void;
use std::sync::{Arc, OnceLock};
use svcbatch_common::codes::{
    ERROR_CALL_NOT_IMPLEMENTED, ERROR_FAILED_SERVICE_CONTROLLER_CONNECT, ERROR_SUCCESS,
};
use svcbatch_common::{ControlSignal, Error};
use svcbatch_service::eventlog::report_error;
use svcbatch_service::{ControlHandle, ServiceController};
use svcbatch_state::{ServiceStatus, StatusReporter};
use tracing::{debug, info};
use windows::core::{HSTRING, PWSTR};
use windows::Win32::System::Services::{
    RegisterServiceCtrlHandlerExW, SetServiceStatus, StartServiceCtrlDispatcherW,
    SERVICE_STATUS, SERVICE_STATUS_CURRENT_STATE, SERVICE_STATUS_HANDLE, SERVICE_TABLE_ENTRYW,
    SERVICE_WIN32_OWN_PROCESS,
};

static ARGS: OnceLock<Args> = OnceLock::new();
static CONTROL: OnceLock<ControlHandle> = OnceLock::new();

const USAGE: &str = "\
Usage: svcbatch [workingDirOverride] [-b] [-c] [-s] [-w] <batchFile>

svcbatch runs a batch file as a Windows service and must be started by the
service control manager. Create the service with:

    sc create <name> binPath= \"<path>\\svcbatch.exe [options] <batchFile>\"
";

pub fn run(args: Args) -> Result<u32> {
    if !is_service_session() {
        eprint!("{}", USAGE);
        return Ok(1);
    }
    ARGS.set(args)
        .map_err(|_| anyhow!("Service arguments already initialized"))?;

    let mut name: Vec<u16> = vec![0];
    let table = [
        SERVICE_TABLE_ENTRYW {
            lpServiceName: PWSTR(name.as_mut_ptr()),
            lpServiceProc: Some(service_main),
        },
        SERVICE_TABLE_ENTRYW::default(),
    ];

    // Blocks until the service stops
    if let Err(e) = unsafe { StartServiceCtrlDispatcherW(table.as_ptr()) } {
        let code = (e.code().0 as u32) & 0xFFFF;
        if code == ERROR_FAILED_SERVICE_CONTROLLER_CONNECT {
            eprint!("{}", USAGE);
            return Ok(1);
        }
        let reason = format!("StartServiceCtrlDispatcherW failed: {}", e);
        return Err(Error::service_manager(code, reason).into());
    }
    Ok(ERROR_SUCCESS)
}

/// Services run on a non-interactive window station.
fn is_service_session() -> bool {
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::StationsAndDesktops::{
        GetProcessWindowStation, GetUserObjectInformationW, UOI_FLAGS, USEROBJECTFLAGS,
    };
    const WSF_VISIBLE: u32 = 0x0001;

    unsafe {
        let Ok(station) = GetProcessWindowStation() else {
            return false;
        };
        let mut flags = USEROBJECTFLAGS::default();
        let result = GetUserObjectInformationW(
            HANDLE(station.0),
            UOI_FLAGS,
            Some(&mut flags as *mut USEROBJECTFLAGS as *mut c_void),
            std::mem::size_of::<USEROBJECTFLAGS>() as u32,
            None,
        );
        match result {
            Ok(()) => flags.dwFlags & WSF_VISIBLE == 0,
            Err(_) => false,
        }
    }
}

unsafe extern "system" fn service_main(argc: u32, argv: *mut PWSTR) {
    let name = if argc > 0 && !argv.is_null() {
        (*argv).to_string().unwrap_or_default()
    } else {
        String::new()
    };

    let code = match run_service(&name) {
        Ok(code) => code,
        Err(e) => {
            let code = crate::cli::error_code(&e);
            report_error(&name, &format!("{:#}", e));
            std::process::exit(code as i32);
        }
    };
    debug!(code, "Service main finished");
}

fn run_service(name: &str) -> Result<u32> {
    let args = ARGS.get().ok_or_else(|| anyhow!("Service arguments missing"))?;
    let config = args.service_config(name)?;

    let service_name = HSTRING::from(name);
    let handle =
        unsafe { RegisterServiceCtrlHandlerExW(&service_name, Some(control_handler), None) }
            .map_err(|e| {
                Error::service_manager(
                    (e.code().0 as u32) & 0xFFFF,
                    format!("RegisterServiceCtrlHandlerExW failed: {}", e),
                )
            })?;

    let reporter = Arc::new(ScmReporter { handle: handle.0 });
    let controller = ServiceController::new(config, reporter);
    let _ = CONTROL.set(controller.control_handle());

    info!(service = name, "Service registered");
    Ok(controller.run())
}

unsafe extern "system" fn control_handler(
    control: u32,
    _event_type: u32,
    _event_data: *mut c_void,
    _context: *mut c_void,
) -> u32 {
    let Some(handle) = CONTROL.get() else {
        return ERROR_CALL_NOT_IMPLEMENTED;
    };
    let Some(signal) = ControlSignal::from_code(control) else {
        return ERROR_CALL_NOT_IMPLEMENTED;
    };
    match handle.control(signal) {
        Ok(()) => ERROR_SUCCESS,
        Err(code) => code,
    }
}

struct ScmReporter {
    handle: isize,
}

impl StatusReporter for ScmReporter {
    fn report(&self, status: &ServiceStatus) -> svcbatch_common::Result<()> {
        let raw = SERVICE_STATUS {
            dwServiceType: SERVICE_WIN32_OWN_PROCESS,
            dwCurrentState: SERVICE_STATUS_CURRENT_STATE(status.state.code()),
            dwControlsAccepted: status.controls_accepted,
            dwWin32ExitCode: status.win32_exit_code,
            dwServiceSpecificExitCode: status.service_exit_code,
            dwCheckPoint: status.checkpoint,
            dwWaitHint: status.wait_hint,
        };
        unsafe { SetServiceStatus(SERVICE_STATUS_HANDLE(self.handle), &raw) }.map_err(|e| {
            Error::service_manager(
                (e.code().0 as u32) & 0xFFFF,
                format!("SetServiceStatus failed: {}", e),
            )
        })
    }
}
