//! FaceGate Terminal - Android JNI Bindings
//!
//! Exposes the terminal API to Kotlin/Java via JNI. Structured results
//! cross the boundary as JSON strings; failures come back as
//! `{"error": "..."}` or `null`.

#![cfg(feature = "android")]

use std::sync::Arc;

use chrono::Utc;
use jni::objects::{JClass, JFloatArray, JString};
use jni::sys::{jboolean, jstring, JNI_FALSE, JNI_TRUE};
use jni::JNIEnv;
use parking_lot::{const_rwlock, RwLock};
use serde::Serialize;

use crate::api::TerminalApi;
use crate::config::TerminalConfig;
use crate::error::TerminalResult;

// Global terminal instance (singleton for Android)
static TERMINAL: RwLock<Option<Arc<TerminalApi>>> = const_rwlock(None);

fn terminal() -> Option<Arc<TerminalApi>> {
    TERMINAL.read().clone()
}

fn read_string(env: &mut JNIEnv, value: &JString) -> Option<String> {
    env.get_string(value).ok().map(Into::into)
}

fn to_jstring(env: &mut JNIEnv, value: &str) -> jstring {
    match env.new_string(value) {
        Ok(s) => s.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

fn to_json<T: Serialize>(result: TerminalResult<T>) -> String {
    let value = result
        .map_err(|e| e.to_string())
        .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string()));
    match value {
        Ok(v) => v.to_string(),
        Err(e) => serde_json::json!({ "error": e }).to_string(),
    }
}

fn not_opened<T>() -> TerminalResult<T> {
    Err(crate::error::TerminalError::Config("terminal not opened".into()))
}

/// Open (or reopen) the terminal rooted at `dataDir`
#[no_mangle]
pub extern "system" fn Java_dev_facegate_terminal_NativeTerminal_open(
    mut env: JNIEnv,
    _class: JClass,
    data_dir: JString,
) -> jboolean {
    let Some(data_dir) = read_string(&mut env, &data_dir) else {
        return JNI_FALSE;
    };

    match TerminalApi::open(TerminalConfig::with_data_dir(data_dir)) {
        Ok(api) => {
            *TERMINAL.write() = Some(Arc::new(api));
            JNI_TRUE
        }
        Err(e) => {
            log::error!("cannot open terminal: {}", e);
            JNI_FALSE
        }
    }
}

#[no_mangle]
pub extern "system" fn Java_dev_facegate_terminal_NativeTerminal_isPaired(
    _env: JNIEnv,
    _class: JClass,
) -> jboolean {
    match terminal() {
        Some(api) if api.is_paired() => JNI_TRUE,
        _ => JNI_FALSE,
    }
}

/// Encrypt a JSON payload; `null` on failure
#[no_mangle]
pub extern "system" fn Java_dev_facegate_terminal_NativeTerminal_encrypt(
    mut env: JNIEnv,
    _class: JClass,
    json: JString,
) -> jstring {
    let Some(json) = read_string(&mut env, &json) else {
        return std::ptr::null_mut();
    };
    let Some(api) = terminal() else {
        return std::ptr::null_mut();
    };

    let encrypted = serde_json::from_str::<serde_json::Value>(&json)
        .map_err(Into::into)
        .and_then(|payload| api.encrypt(&payload));
    match encrypted {
        Ok(envelope) => to_jstring(&mut env, &envelope),
        Err(e) => {
            log::warn!("encrypt failed: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// Decrypt an envelope; `null` on any verification failure
#[no_mangle]
pub extern "system" fn Java_dev_facegate_terminal_NativeTerminal_decrypt(
    mut env: JNIEnv,
    _class: JClass,
    envelope: JString,
) -> jstring {
    let Some(envelope) = read_string(&mut env, &envelope) else {
        return std::ptr::null_mut();
    };
    let Some(api) = terminal() else {
        return std::ptr::null_mut();
    };

    match api.decrypt(&envelope) {
        Ok(plaintext) => to_jstring(&mut env, &plaintext),
        Err(e) => {
            log::warn!("decrypt failed: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// Apply a plaintext sync payload; returns the sync result as JSON
#[no_mangle]
pub extern "system" fn Java_dev_facegate_terminal_NativeTerminal_applySync(
    mut env: JNIEnv,
    _class: JClass,
    payload: JString,
) -> jstring {
    let Some(payload) = read_string(&mut env, &payload) else {
        return std::ptr::null_mut();
    };

    let result = match terminal() {
        Some(api) => api.apply_sync_bytes(payload.as_bytes(), Utc::now()),
        None => not_opened(),
    };
    to_jstring(&mut env, &to_json(result))
}

/// Recognize an embedding; returns the verdict as JSON
#[no_mangle]
pub extern "system" fn Java_dev_facegate_terminal_NativeTerminal_recognize(
    mut env: JNIEnv,
    _class: JClass,
    embedding: JFloatArray,
) -> jstring {
    let len = match env.get_array_length(&embedding) {
        Ok(len) => usize::try_from(len).unwrap_or(0),
        Err(_) => return std::ptr::null_mut(),
    };
    let mut query = vec![0.0f32; len];
    if env.get_float_array_region(&embedding, 0, &mut query).is_err() {
        return std::ptr::null_mut();
    }

    let verdict = match terminal() {
        Some(api) => Ok(api.recognize_detailed(&query)),
        None => not_opened(),
    };
    to_jstring(&mut env, &to_json(verdict))
}

/// Recognition statistics as JSON
#[no_mangle]
pub extern "system" fn Java_dev_facegate_terminal_NativeTerminal_stats(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let status = match terminal() {
        Some(api) => Ok(api.status()),
        None => not_opened(),
    };
    to_jstring(&mut env, &to_json(status))
}
