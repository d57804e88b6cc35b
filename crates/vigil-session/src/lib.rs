//! vigil-session — session-bus bindings for the desktop screen locker.
//!
//! Implements [`vigil_core::SessionBackend`] against the
//! `org.freedesktop.ScreenSaver` interface exposed by KDE and compatible
//! desktops.

pub mod screensaver;

pub use screensaver::ScreenSaverClient;
