use std::{
    cell::Cell,
    fs::OpenOptions,
    io::Write,
    panic::PanicHookInfo,
    path::{Path, PathBuf},
};

pub const CRASH_LOG_FILE: &str = "crash_log.txt";

thread_local! {
    static PANIC_COUNT: Cell<u32> = const { Cell::new(0) };
}

pub fn default_path() -> PathBuf {
    crate::configuration::configuration_directory().join(CRASH_LOG_FILE)
}

/// One crash entry: a timestamp header followed by the body.
pub fn format_entry(timestamp: &chrono::DateTime<chrono::Local>, body: &str) -> String {
    format!(
        "\n[{}] CRITICAL:\n{}\n",
        timestamp.format("%Y-%m-%d %H:%M:%S"),
        body.trim_end()
    )
}

pub fn append_entry(path: &Path, entry: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?
        .write_all(entry.as_bytes())
}

fn describe(info: &PanicHookInfo<'_>) -> String {
    let payload = info.payload();
    let message = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<unknown panic info>");
    let location = info
        .location()
        .map(|location| location.to_string())
        .unwrap_or_else(|| "<unknown location>".into());
    let thread = std::thread::current();

    format!(
        "hostsgate v{} ({} {})\nthread: {}\nlocation: {location}\npanic: {message}\n\n{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH,
        thread.name().unwrap_or("<unnamed>"),
        std::backtrace::Backtrace::force_capture(),
    )
}

/// Records every panic to `path`. Nothing here may panic again.
pub fn install(path: PathBuf) {
    std::panic::set_hook(Box::new(move |info| {
        let count = PANIC_COUNT.with(|count| {
            count.set(count.get() + 1);
            count.get()
        });
        if count > 1 {
            log::error!("[crash] panic happened more than once on this thread, exiting");
            std::process::exit(1);
        }

        let body = describe(info);
        let entry = format_entry(&chrono::Local::now(), &body);
        let _ = std::io::stderr().write_all(entry.as_bytes());

        match append_entry(&path, &entry) {
            Ok(()) => log::error!("[crash] panic recorded in {}", path.display()),
            Err(error) => log::error!("[crash] failed to write {}: {error}", path.display()),
        }

        #[cfg(target_os = "windows")]
        show_error_box(&body);
    }));
}

#[cfg(target_os = "windows")]
fn show_error_box(body: &str) {
    use windows::{
        Win32::UI::WindowsAndMessaging::{MB_ICONERROR, MB_OK, MessageBoxW},
        core::{PCWSTR, w},
    };

    let first_lines: String = body.lines().take(4).collect::<Vec<_>>().join("\n");
    let text: Vec<u16> = first_lines
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect();
    unsafe {
        let _ = MessageBoxW(
            None,
            PCWSTR(text.as_ptr()),
            w!("hostsgate crashed"),
            MB_OK | MB_ICONERROR,
        );
    }
}
