use std::io::{self, Write};

use futures::channel::mpsc;
use interprocess::local_socket::{GenericNamespaced, ListenerOptions, prelude::*};

const FOCUS_MESSAGE: &str = "focus";

pub enum InstanceRole {
    Primary(PrimaryInstance),
    /// Another process owns the key and has been asked to come forward.
    Secondary,
}

/// Held for the lifetime of the primary process.
pub struct PrimaryInstance {
    focus_requests: mpsc::UnboundedReceiver<()>,
    #[cfg(target_os = "windows")]
    _mutex: win32::MutexGuard,
}

impl PrimaryInstance {
    /// Drains pending focus pings; `true` if at least one arrived.
    pub fn take_focus_request(&mut self) -> bool {
        let mut requested = false;
        while let Ok(Some(())) = self.focus_requests.try_next() {
            requested = true;
        }
        requested
    }
}

/// The first process to bind `key` wins; later ones ping it and step aside.
pub fn acquire(key: &str) -> io::Result<InstanceRole> {
    if ping_primary(key).is_ok() {
        log::info!("[single_instance] {key} is held by a running instance");
        return Ok(InstanceRole::Secondary);
    }

    #[cfg(target_os = "windows")]
    let mutex = match win32::acquire_mutex(key) {
        Some(mutex) => mutex,
        None => return Ok(secondary_after_race(key)),
    };

    let name = key.to_ns_name::<GenericNamespaced>()?;
    let listener = match ListenerOptions::new().name(name).create_sync() {
        Ok(listener) => listener,
        Err(error) if error.kind() == io::ErrorKind::AddrInUse => {
            return Ok(secondary_after_race(key));
        }
        Err(error) => return Err(error),
    };

    let (sender, receiver) = mpsc::unbounded();
    std::thread::Builder::new()
        .name("hostsgate-instance".into())
        .spawn(move || {
            for connection in listener.incoming() {
                // The connection itself is the request; the payload is never read.
                let connection = match connection {
                    Ok(connection) => connection,
                    Err(error) => {
                        log::debug!("[single_instance] incoming connection failed: {error}");
                        continue;
                    }
                };
                drop(connection);
                log::info!("[single_instance] focus requested by a second launch");
                if sender.unbounded_send(()).is_err() {
                    break;
                }
            }
        })?;

    log::info!("[single_instance] acquired {key}");
    Ok(InstanceRole::Primary(PrimaryInstance {
        focus_requests: receiver,
        #[cfg(target_os = "windows")]
        _mutex: mutex,
    }))
}

/// Succeeds once connected; the primary may hang up before the message lands.
fn ping_primary(key: &str) -> io::Result<()> {
    let mut stream = LocalSocketStream::connect(key.to_ns_name::<GenericNamespaced>()?)?;
    if let Err(error) = stream.write_all(format!("{FOCUS_MESSAGE}\n").as_bytes()) {
        log::debug!("[single_instance] focus message not delivered: {error}");
    }
    Ok(())
}

/// Another process bound the key between our connect attempt and bind.
fn secondary_after_race(key: &str) -> InstanceRole {
    log::info!("[single_instance] lost the race for {key}");
    if let Err(error) = ping_primary(key) {
        log::warn!("[single_instance] could not signal the running instance: {error}");
    }
    InstanceRole::Secondary
}

#[cfg(target_os = "windows")]
mod win32 {
    use windows::{
        Win32::{
            Foundation::{CloseHandle, ERROR_ALREADY_EXISTS, GetLastError, HANDLE},
            System::Threading::CreateMutexW,
        },
        core::PCWSTR,
    };

    pub struct MutexGuard {
        handle: Option<HANDLE>,
    }

    unsafe impl Send for MutexGuard {}
    unsafe impl Sync for MutexGuard {}

    impl Drop for MutexGuard {
        fn drop(&mut self) {
            if let Some(handle) = self.handle.take() {
                unsafe {
                    let _ = CloseHandle(handle);
                }
            }
        }
    }

    /// `None` when another process already holds the named mutex.
    pub fn acquire_mutex(key: &str) -> Option<MutexGuard> {
        let name: Vec<u16> = format!("Local\\{key}")
            .encode_utf16()
            .chain(std::iter::once(0))
            .collect();
        let result = unsafe { CreateMutexW(None, true, PCWSTR(name.as_ptr())) };

        match result {
            Ok(handle) => {
                if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
                    unsafe {
                        let _ = CloseHandle(handle);
                    }
                    return None;
                }
                Some(MutexGuard {
                    handle: Some(handle),
                })
            }
            Err(error) => {
                log::warn!("[single_instance] CreateMutexW failed: {error}");
                Some(MutexGuard { handle: None })
            }
        }
    }
}
