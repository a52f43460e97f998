//! JNI Bridge - Kotlin/Java bindings for the match engine
//!
//! This module provides the JNI interface for calling the engine from Android.
//! All functions follow the JNI naming convention: Java_<package>_<class>_<method>
//!
//! A session lives behind an opaque `long` handle returned by `create` and
//! released by `destroy`. Each handle owns a mutex, so calls coming from the
//! capture thread and the UI thread are serialised. Structured values cross
//! the boundary as JSON; failures come back as `{"error": "..."}`.

use jni::objects::{JClass, JString};
use jni::sys::{jboolean, jint, jlong, jstring, JNI_FALSE, JNI_TRUE};
use jni::JNIEnv;
use log::{error, info};
use std::sync::{Mutex, PoisonError};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::observation::{CardObservation, Rect, ScreenSize};
use crate::session::MatchSession;
use crate::store::{FileStore, KeyValueStore};

type NativeSession = Mutex<MatchSession<FileStore>>;

// ============================================================================
// JSON plumbing (no JVM involved)
// ============================================================================

fn open_session(config_json: &str, storage_dir: &str) -> EngineResult<MatchSession<FileStore>> {
    let config = EngineConfig::from_json(config_json)?;
    let store = FileStore::open(storage_dir)?;
    info!("Opening match session, cache dir {}", storage_dir);
    Ok(MatchSession::new(&config, store))
}

fn process_cycle_json<S: KeyValueStore>(
    session: &mut MatchSession<S>,
    observations_json: &str,
    width: i32,
    height: i32,
) -> EngineResult<String> {
    let observations: Vec<CardObservation> = serde_json::from_str(observations_json)?;
    let report = session.process_cycle(&observations, ScreenSize::new(width, height));
    Ok(serde_json::to_string(&report)?)
}

fn record_match_json<S: KeyValueStore>(session: &mut MatchSession<S>, pair_json: &str) -> EngineResult<usize> {
    let [first, second]: [Rect; 2] = serde_json::from_str(pair_json)?;
    Ok(session.record_match_committed(first, second))
}

fn stats_json<S: KeyValueStore>(session: &MatchSession<S>) -> EngineResult<String> {
    Ok(serde_json::to_string(&session.stats())?)
}

fn search_regions_json<S: KeyValueStore>(
    session: &mut MatchSession<S>,
    width: i32,
    height: i32,
) -> EngineResult<String> {
    let regions = session.search_regions(ScreenSize::new(width, height));
    Ok(serde_json::to_string(&regions)?)
}

fn error_json(e: &EngineError) -> String {
    serde_json::json!({ "error": e.to_string() }).to_string()
}

// ============================================================================
// Handle helpers
// ============================================================================

fn with_session<T>(
    handle: jlong,
    f: impl FnOnce(&mut MatchSession<FileStore>) -> EngineResult<T>,
) -> EngineResult<T> {
    if handle == 0 {
        return Err(EngineError::InvalidHandle);
    }
    // SAFETY: non-zero handles are produced by `create` and stay valid until `destroy`
    let cell = unsafe { &*(handle as *const NativeSession) };
    let mut session = cell.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut *session)
}

fn read_string(env: &mut JNIEnv, value: &JString) -> EngineResult<String> {
    Ok(env.get_string(value)?.into())
}

fn respond(env: &mut JNIEnv, result: EngineResult<String>) -> jstring {
    let json = result.unwrap_or_else(|e| {
        error!("{}", e);
        error_json(&e)
    });
    match env.new_string(json) {
        Ok(s) => s.into_raw(),
        Err(e) => {
            error!("Failed to create Java string: {}", e);
            std::ptr::null_mut()
        }
    }
}

fn log_failure<T>(result: EngineResult<T>, fallback: T) -> T {
    result.unwrap_or_else(|e| {
        error!("{}", e);
        fallback
    })
}

fn to_jboolean(value: bool) -> jboolean {
    if value {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

// ============================================================================
// Library
// ============================================================================

/// Initialize the native library
/// JNI: MatchEngineNative.init()
#[no_mangle]
pub extern "system" fn Java_com_example_memorymatch_engine_MatchEngineNative_init(
    _env: JNIEnv,
    _class: JClass,
) {
    crate::init_library();
}

/// Get library version
/// JNI: MatchEngineNative.getVersion(): String
#[no_mangle]
pub extern "system" fn Java_com_example_memorymatch_engine_MatchEngineNative_getVersion<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
) -> jstring {
    respond(&mut env, Ok(crate::VERSION.to_string()))
}

// ============================================================================
// Session lifecycle
// ============================================================================

/// Create a session
/// JNI: MatchEngineNative.create(configJson: String, storageDir: String): Long (0 on failure)
#[no_mangle]
pub extern "system" fn Java_com_example_memorymatch_engine_MatchEngineNative_create<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    config_json: JString<'local>,
    storage_dir: JString<'local>,
) -> jlong {
    let result = (|| -> EngineResult<MatchSession<FileStore>> {
        let config = read_string(&mut env, &config_json)?;
        let dir = read_string(&mut env, &storage_dir)?;
        open_session(&config, &dir)
    })();

    match result {
        Ok(session) => Box::into_raw(Box::new(Mutex::new(session))) as jlong,
        Err(e) => {
            error!("Failed to create session: {}", e);
            0
        }
    }
}

/// Release a session
/// JNI: MatchEngineNative.destroy(handle: Long)
#[no_mangle]
pub extern "system" fn Java_com_example_memorymatch_engine_MatchEngineNative_destroy(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    if handle != 0 {
        // SAFETY: the handle came from `create` and the host destroys it once
        drop(unsafe { Box::from_raw(handle as *mut NativeSession) });
    }
}

// ============================================================================
// Cycle
// ============================================================================

/// Run one observation cycle
/// JNI: MatchEngineNative.processCycle(handle: Long, observationsJson: String,
///                                     screenWidth: Int, screenHeight: Int): String (JSON CycleReport)
#[no_mangle]
pub extern "system" fn Java_com_example_memorymatch_engine_MatchEngineNative_processCycle<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    handle: jlong,
    observations_json: JString<'local>,
    screen_width: jint,
    screen_height: jint,
) -> jstring {
    let result = read_string(&mut env, &observations_json).and_then(|json| {
        with_session(handle, |s| process_cycle_json(s, &json, screen_width, screen_height))
    });
    respond(&mut env, result)
}

/// Both taps of a commit were carried out
/// JNI: MatchEngineNative.recordMatch(handle: Long, pairJson: String): Int (-1 on failure)
#[no_mangle]
pub extern "system" fn Java_com_example_memorymatch_engine_MatchEngineNative_recordMatch<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    handle: jlong,
    pair_json: JString<'local>,
) -> jint {
    let result = read_string(&mut env, &pair_json)
        .and_then(|json| with_session(handle, |s| record_match_json(s, &json)))
        .map(|removed| removed as jint);
    log_failure(result, -1)
}

/// A single flip was carried out
/// JNI: MatchEngineNative.recordMove(handle: Long)
#[no_mangle]
pub extern "system" fn Java_com_example_memorymatch_engine_MatchEngineNative_recordMove(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    log_failure(
        with_session(handle, |s| {
            s.record_move_made();
            Ok(())
        }),
        (),
    );
}

/// Start a new game
/// JNI: MatchEngineNative.reset(handle: Long)
#[no_mangle]
pub extern "system" fn Java_com_example_memorymatch_engine_MatchEngineNative_reset(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    log_failure(
        with_session(handle, |s| {
            s.reset();
            Ok(())
        }),
        (),
    );
}

/// JNI: MatchEngineNative.stats(handle: Long): String (JSON BoardStats)
#[no_mangle]
pub extern "system" fn Java_com_example_memorymatch_engine_MatchEngineNative_stats<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    handle: jlong,
) -> jstring {
    let result = with_session(handle, |s| stats_json(s));
    respond(&mut env, result)
}

/// JNI: MatchEngineNative.isComplete(handle: Long): Boolean
#[no_mangle]
pub extern "system" fn Java_com_example_memorymatch_engine_MatchEngineNative_isComplete(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jboolean {
    to_jboolean(log_failure(with_session(handle, |s| Ok(s.is_complete())), false))
}

// ============================================================================
// Layout cache
// ============================================================================

/// JNI: MatchEngineNative.setCacheEnabled(handle: Long, enabled: Boolean)
#[no_mangle]
pub extern "system" fn Java_com_example_memorymatch_engine_MatchEngineNative_setCacheEnabled(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
    enabled: jboolean,
) {
    log_failure(
        with_session(handle, |s| {
            s.set_cache_enabled(enabled == JNI_TRUE);
            Ok(())
        }),
        (),
    );
}

/// JNI: MatchEngineNative.isCacheEnabled(handle: Long): Boolean
#[no_mangle]
pub extern "system" fn Java_com_example_memorymatch_engine_MatchEngineNative_isCacheEnabled(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jboolean {
    to_jboolean(log_failure(with_session(handle, |s| Ok(s.is_cache_enabled())), false))
}

/// JNI: MatchEngineNative.clearCache(handle: Long)
#[no_mangle]
pub extern "system" fn Java_com_example_memorymatch_engine_MatchEngineNative_clearCache(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    log_failure(
        with_session(handle, |s| {
            s.clear_cache();
            Ok(())
        }),
        (),
    );
}

/// Cached regions for the recognizer to search
/// JNI: MatchEngineNative.searchRegions(handle: Long, screenWidth: Int, screenHeight: Int): String (JSON Array)
#[no_mangle]
pub extern "system" fn Java_com_example_memorymatch_engine_MatchEngineNative_searchRegions<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    handle: jlong,
    screen_width: jint,
    screen_height: jint,
) -> jstring {
    let result = with_session(handle, |s| search_regions_json(s, screen_width, screen_height));
    respond(&mut env, result)
}
