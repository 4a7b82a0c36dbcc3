#![cfg_attr(not(test), allow(dead_code))]

//! Serializes tests that mutate process-wide environment variables and
//! restores every touched variable when the guard drops.

use std::{
    env,
    ffi::OsString,
    sync::{Mutex, MutexGuard, PoisonError},
};

pub(crate) struct EnvMutex(Mutex<()>);

impl EnvMutex {
    pub const fn new() -> Self {
        Self(Mutex::new(()))
    }

    pub fn lock(&self) -> EnvGuard<'_> {
        let inner = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        EnvGuard {
            _inner: inner,
            saved: Vec::new(),
        }
    }
}

pub(crate) struct EnvGuard<'a> {
    _inner: MutexGuard<'a, ()>,
    saved: Vec<(OsString, Option<OsString>)>,
}

impl EnvGuard<'_> {
    pub fn set(&mut self, vars: &[(&str, &str)]) {
        for &(name, value) in vars {
            self.remember(name);
            env::set_var(name, value);
        }
    }

    pub fn remove(&mut self, names: &[&str]) {
        for &name in names {
            self.remember(name);
            env::remove_var(name);
        }
    }

    fn remember(&mut self, name: &str) {
        let name = OsString::from(name);
        if !self.saved.iter().any(|(saved, _)| *saved == name) {
            let previous = env::var_os(&name);
            self.saved.push((name, previous));
        }
    }
}

impl Drop for EnvGuard<'_> {
    fn drop(&mut self) {
        for (name, value) in self.saved.drain(..) {
            match value {
                Some(value) => env::set_var(&name, value),
                None => env::remove_var(&name),
            }
        }
    }
}
