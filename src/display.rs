// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The display session: lifecycle of a connection to an acceleration backend.

use std::cell::Cell;
use std::ffi::c_char;
use std::ffi::c_void;
use std::ffi::CStr;
use std::fmt;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::sync::Arc;

use crate::backend::Backend;
use crate::backend::Status;
use crate::error::DriverStatus;
use crate::error::Result;
use crate::error::VaError;

/// Version of the acceleration API negotiated at initialization.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: i32,
    pub minor: i32,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Receiver of the diagnostic messages emitted by a backend.
///
/// Messages may be delivered from threads owned by the backend, at any time between
/// initialization and termination of the display.
pub trait DiagnosticSink: Send + Sync {
    fn error(&self, message: &str);
    fn info(&self, message: &str);
}

/// A [`DiagnosticSink`] relaying messages to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn error(&self, message: &str) {
        log::error!(target: "va", "{}", message);
    }

    fn info(&self, message: &str) {
        log::info!(target: "va", "{}", message);
    }
}

/// Platform-specific acquisition of a native display handle.
///
/// Implementations open whatever the platform needs (a DRM device node, a window system
/// connection...) and return a backend ready to be initialized.
pub trait DisplaySource {
    type Backend: Backend;

    fn acquire(self) -> anyhow::Result<Self::Backend>;
}

/// Pinned reference to the sink, handed to the backend as the callbacks' user context.
type PinnedSink = Box<Arc<dyn DiagnosticSink>>;

/// Recovers the sink from the user context passed to the trampolines and forwards `message` to
/// it. Panics raised by the sink are contained here.
///
/// # Safety
///
/// `user_context` must be null or point to a live `Arc<dyn DiagnosticSink>`, and `message` must
/// be null or a valid C string.
unsafe fn relay(
    user_context: *mut c_void,
    message: *const c_char,
    deliver: fn(&dyn DiagnosticSink, &str),
) {
    if user_context.is_null() || message.is_null() {
        return;
    }

    // SAFETY: guaranteed by the caller.
    let (sink, message) = unsafe {
        (
            &*(user_context as *const Arc<dyn DiagnosticSink>),
            CStr::from_ptr(message).to_string_lossy(),
        )
    };

    let _ = catch_unwind(AssertUnwindSafe(|| deliver(sink.as_ref(), &message)));
}

unsafe extern "C" fn on_error(user_context: *mut c_void, message: *const c_char) {
    // SAFETY: `user_context` is the pinned sink registered in `Display::initialize`.
    unsafe { relay(user_context, message, |sink, message| sink.error(message)) }
}

unsafe extern "C" fn on_info(user_context: *mut c_void, message: *const c_char) {
    // SAFETY: `user_context` is the pinned sink registered in `Display::initialize`.
    unsafe { relay(user_context, message, |sink, message| sink.info(message)) }
}

/// An initialized connection to an acceleration backend.
///
/// Objects created from a display (configs, surfaces, contexts) keep a reference to it, so it is
/// usually handled through an `Rc`. The display is terminated either explicitly with
/// [`Display::terminate`] or when the last reference to it is dropped.
///
/// A display is not thread-safe: the backend is single-threaded per connection.
pub struct Display<B: Backend> {
    backend: B,
    version: Version,
    sink: Arc<dyn DiagnosticSink>,
    /// Reference registered with the backend's callbacks. Released after termination.
    pinned_sink: Cell<Option<PinnedSink>>,
    terminated: Cell<bool>,
    /// Number of configs, surfaces and contexts created from this display and not yet destroyed.
    live_objects: Cell<usize>,
}

impl<B: Backend> Display<B> {
    /// Initializes `backend`, routing its diagnostic messages to `sink`.
    pub fn initialize(backend: B, sink: Arc<dyn DiagnosticSink>) -> Result<Rc<Self>> {
        let pinned_sink: PinnedSink = Box::new(Arc::clone(&sink));
        let user_context = &*pinned_sink as *const Arc<dyn DiagnosticSink> as *mut c_void;

        // SAFETY: `pinned_sink` lives on the heap and is kept alive by the display until the
        // backend has been terminated. It is only dropped earlier if initialization fails, after
        // the callbacks have been unregistered.
        unsafe { backend.set_message_callbacks(Some(on_error), Some(on_info), user_context) };

        let version = match backend.initialize() {
            Ok(version) => version,
            Err(status) => {
                let err = VaError::Initialization(DriverStatus {
                    call: "vaInitialize",
                    status,
                    message: backend.status_str(status),
                });
                // SAFETY: unregistering, so no pointer is retained.
                unsafe { backend.set_message_callbacks(None, None, std::ptr::null_mut()) };
                return Err(err);
            }
        };

        Ok(Rc::new(Self {
            backend,
            version,
            sink,
            pinned_sink: Cell::new(Some(pinned_sink)),
            terminated: Cell::new(false),
            live_objects: Cell::new(0),
        }))
    }

    /// Acquires a native display from `source` and initializes it.
    pub fn open<S>(source: S, sink: Arc<dyn DiagnosticSink>) -> Result<Rc<Self>>
    where
        S: DisplaySource<Backend = B>,
    {
        let backend = source.acquire().map_err(VaError::Platform)?;
        Self::initialize(backend, sink)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the vendor-specific description of the backend implementation.
    pub fn vendor_string(&self) -> Result<String> {
        self.ensure_live()?;
        Ok(self.backend.vendor_string())
    }

    /// Gives access to the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.get()
    }

    /// Terminates the connection.
    ///
    /// All configs, surfaces and contexts created from this display must have been destroyed
    /// beforehand. Calling this method on a terminated display does nothing.
    pub fn terminate(&self) -> Result<()> {
        if self.terminated.get() {
            return Ok(());
        }

        let live_objects = self.live_objects.get();
        if live_objects > 0 {
            return Err(VaError::usage(format!(
                "cannot terminate display: {} object(s) created from it are still alive",
                live_objects
            )));
        }

        self.terminated.set(true);
        let res = self.backend.terminate();
        let pinned_sink = self.pinned_sink.take();
        match res {
            Ok(()) => {
                drop(pinned_sink);
                Ok(())
            }
            Err(status) => {
                // The backend may still hold the user context, which must never dangle.
                std::mem::forget(pinned_sink);
                Err(VaError::Initialization(self.driver_status("vaTerminate", status)))
            }
        }
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.terminated.get() {
            Err(VaError::usage("display has been terminated"))
        } else {
            Ok(())
        }
    }

    pub(crate) fn driver_status(&self, call: &'static str, status: Status) -> DriverStatus {
        DriverStatus {
            call,
            status,
            message: self.backend.status_str(status),
        }
    }

    /// Converts the raw result of the backend entry point `call` into a typed error using
    /// `kind`.
    pub(crate) fn check<T>(
        &self,
        call: &'static str,
        kind: fn(DriverStatus) -> VaError,
        res: std::result::Result<T, Status>,
    ) -> Result<T> {
        res.map_err(|status| kind(self.driver_status(call, status)))
    }

    /// Reports an error that cannot be returned to the caller, e.g. from a `Drop` implementation.
    pub(crate) fn report(&self, err: &VaError) {
        self.sink.error(&err.to_string());
    }

    pub(crate) fn object_created(&self) {
        self.live_objects.set(self.live_objects.get() + 1);
    }

    pub(crate) fn object_destroyed(&self) {
        self.live_objects.set(self.live_objects.get().saturating_sub(1));
    }
}

impl<B: Backend> Drop for Display<B> {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            self.report(&e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::backend::dummy::DummyBackend;

    /// Sink recording every message it receives.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) errors: Mutex<Vec<String>>,
        pub(crate) infos: Mutex<Vec<String>>,
    }

    impl DiagnosticSink for RecordingSink {
        fn error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }

        fn info(&self, message: &str) {
            self.infos.lock().unwrap().push(message.to_string());
        }
    }

    pub(crate) fn open_dummy() -> Rc<Display<DummyBackend>> {
        Display::initialize(DummyBackend::new(), Arc::new(LogSink)).unwrap()
    }

    #[test]
    fn initialize_records_version() {
        let display = open_dummy();

        assert_eq!(display.version(), Version { major: 1, minor: 20 });
        assert_eq!(display.version().to_string(), "1.20");
        assert_eq!(display.vendor_string().unwrap(), "Dummy VA driver 1.0");
    }

    #[test]
    fn initialize_failure() {
        let backend = DummyBackend::new();
        backend.fail_next("vaInitialize", Status::ERROR_INVALID_DISPLAY);

        let err = Display::initialize(backend, Arc::new(LogSink)).err().unwrap();
        assert!(matches!(err, VaError::Initialization(_)));
        assert_eq!(err.status(), Some(Status::ERROR_INVALID_DISPLAY));
        assert_eq!(err.driver_status().unwrap().message, "invalid VADisplay");
    }

    #[test]
    fn open_from_source() {
        let display = Display::open(DummyBackend::new(), Arc::new(LogSink)).unwrap();
        assert_eq!(display.backend().call_count("vaInitialize"), 1);
    }

    #[test]
    fn terminate_is_idempotent() {
        let display = open_dummy();

        display.terminate().unwrap();
        display.terminate().unwrap();
        assert_eq!(display.backend().call_count("vaTerminate"), 1);
        assert!(display.is_terminated());

        // Dropping a terminated display does not terminate it again.
        let backend_calls = display.backend().call_counter();
        drop(display);
        assert_eq!(backend_calls.get("vaTerminate"), 1);
    }

    #[test]
    fn drop_terminates() {
        let display = open_dummy();
        let backend_calls = display.backend().call_counter();

        drop(display);
        assert_eq!(backend_calls.get("vaTerminate"), 1);
    }

    #[test]
    fn terminate_releases_sink() {
        let sink = Arc::new(RecordingSink::default());
        let display = Display::initialize(DummyBackend::new(), sink.clone()).unwrap();
        // Ours, the display's and the one registered with the backend.
        assert_eq!(Arc::strong_count(&sink), 3);

        display.terminate().unwrap();
        assert_eq!(Arc::strong_count(&sink), 2);

        drop(display);
        assert_eq!(Arc::strong_count(&sink), 1);
    }

    #[test]
    fn failed_terminate_keeps_callbacks_valid() {
        let sink = Arc::new(RecordingSink::default());
        let display = Display::initialize(DummyBackend::new(), sink.clone()).unwrap();
        display.backend().fail_next("vaTerminate", Status::ERROR_OPERATION_FAILED);

        let err = display.terminate().unwrap_err();
        assert!(matches!(err, VaError::Initialization(_)));
        assert_eq!(err.status(), Some(Status::ERROR_OPERATION_FAILED));
        assert!(display.is_terminated());

        // The backend may still call back into the sink, which must stay alive.
        display.backend().emit_error("still registered");
        assert_eq!(*sink.errors.lock().unwrap(), vec!["still registered"]);

        // No second attempt, explicitly or on drop.
        display.terminate().unwrap();
        let backend_calls = display.backend().call_counter();
        drop(display);
        assert_eq!(backend_calls.get("vaTerminate"), 1);

        // The registered reference is leaked rather than released.
        assert_eq!(Arc::strong_count(&sink), 2);
    }

    #[test]
    fn vendor_string_after_terminate() {
        let display = open_dummy();
        display.terminate().unwrap();

        assert!(matches!(display.vendor_string(), Err(VaError::Usage(_))));
    }

    #[test]
    fn terminate_with_live_objects() {
        let display = open_dummy();
        let surface = display
            .create_surface(crate::capabilities::RtFormat::YUV420, 64, 64)
            .unwrap();

        assert!(matches!(display.terminate(), Err(VaError::Usage(_))));
        assert_eq!(display.backend().call_count("vaTerminate"), 0);

        drop(surface);
        display.terminate().unwrap();
        assert_eq!(display.backend().call_count("vaTerminate"), 1);
    }

    #[test]
    fn backend_messages_reach_sink() {
        let sink = Arc::new(RecordingSink::default());
        let display = Display::initialize(DummyBackend::new(), sink.clone()).unwrap();

        display.backend().emit_error("hardware hang detected\n");
        display.backend().emit_info("frame decoded");

        // Messages are passed on verbatim.
        assert_eq!(*sink.errors.lock().unwrap(), vec!["hardware hang detected\n"]);
        // The dummy backend greets us on initialization.
        assert_eq!(
            *sink.infos.lock().unwrap(),
            vec!["Dummy VA driver 1.0 initialized", "frame decoded"]
        );

        display.terminate().unwrap();
        // Callbacks are gone along with the connection.
        display.backend().emit_error("late message");
        assert_eq!(sink.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn panicking_sink_is_contained() {
        struct PanickingSink;

        impl DiagnosticSink for PanickingSink {
            fn error(&self, _: &str) {
                panic!("sink failure");
            }

            fn info(&self, _: &str) {}
        }

        let display = Display::initialize(DummyBackend::new(), Arc::new(PanickingSink)).unwrap();
        display.backend().emit_error("boom");
        assert_eq!(display.version().major, 1);
    }

    #[test]
    fn log_sink_relays() {
        let _ = env_logger::builder().is_test(true).try_init();

        let display = open_dummy();
        display.backend().emit_info("relayed through the log facade");
        display.backend().emit_error("relayed through the log facade");
    }
}
