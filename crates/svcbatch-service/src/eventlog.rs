//! Failures that happen before or outside the service log.
//!
//! On Windows they also go to the Application event log under the service
//! name.

use tracing::error;

pub fn report_error(source: &str, message: &str) {
    error!(source, "{}", message);

    #[cfg(windows)]
    if let Err(e) = report_event(source, message) {
        error!("Failed to write event log entry: {}", e);
    }
}

#[cfg(windows)]
fn report_event(source: &str, message: &str) -> windows::core::Result<()> {
    use windows::core::{HSTRING, PCWSTR};
    use windows::Win32::Foundation::PSID;
    use windows::Win32::System::EventLog::{
        DeregisterEventSource, RegisterEventSourceW, ReportEventW, EVENTLOG_ERROR_TYPE,
    };

    let source = HSTRING::from(source);
    let text = HSTRING::from(message);
    unsafe {
        let handle = RegisterEventSourceW(PCWSTR::null(), &source)?;
        let strings = [PCWSTR(text.as_ptr())];
        let result = ReportEventW(
            handle,
            EVENTLOG_ERROR_TYPE,
            0,
            0,
            PSID::default(),
            0,
            Some(&strings),
            None,
        );
        let _ = DeregisterEventSource(handle);
        result
    }
}
