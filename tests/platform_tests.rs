//! Build platform fallback and its warning
//!
//! Kept in its own test binary: the capturing logger is process-global.

use log::{Level, LevelFilter, Log, Metadata, Record};
use std::sync::Mutex;
use terrarium_deploy::hardware::{resolve_platform, PlatformTag};

static CAPTURED: Mutex<Vec<(Level, String)>> = Mutex::new(Vec::new());

struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        CAPTURED
            .lock()
            .unwrap()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}

#[test]
fn test_unknown_arch_warns_and_falls_back_to_amd64() {
    log::set_boxed_logger(Box::new(CaptureLogger)).unwrap();
    log::set_max_level(LevelFilter::Trace);

    assert_eq!(resolve_platform("arm64"), PlatformTag::LinuxArm64);
    assert!(CAPTURED.lock().unwrap().is_empty());

    assert_eq!(resolve_platform("mips"), PlatformTag::LinuxAmd64);
    let captured = CAPTURED.lock().unwrap();
    assert_eq!(captured.len(), 1);
    let (level, message) = &captured[0];
    assert_eq!(*level, Level::Warn);
    assert!(message.contains("mips"));
    assert!(message.contains("linux/amd64"));
}
