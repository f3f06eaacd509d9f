//! Vendor library backend.
//!
//! Wraps the raw `rsa-api-sys` bindings in [`AnalyzerDriver`]. The library
//! keeps one global connection, so only one [`RsaApiDriver`] may exist per
//! process: [`RsaApiDriver::open`] claims a process-wide flag and `Drop`
//! releases it.

#![allow(unsafe_code)]

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_double, c_int};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use rsa_api_sys as sys;
use tracing::{debug, info};

use super::wire;
use super::{
    local_status, AnalyzerDriver, DeviceRecord, DriverResult, DriverStatus, StreamAcqParameters,
    StreamFileInfo, StreamWriteStatus,
};
use crate::error::{Result, RsaError};
use crate::iq::{IqAcqInfo, IqBlockParameters, TriggerMode};
use crate::spectrum::{SpectrumSettings, TraceInfo, TraceSelector};
use crate::streaming::{FilenameSuffix, SampleEncoding, StreamDestination};

/// Set while an [`RsaApiDriver`] exists.
static LIBRARY_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Longest wide string read from a library-owned file name.
const MAX_WIDE_FILENAME: usize = 4096;

fn status_of(code: sys::ReturnStatus) -> DriverStatus {
    // SAFETY: DEVICE_GetErrorString returns null or a pointer to a static,
    // NUL-terminated string owned by the library.
    let message = unsafe {
        let ptr = sys::DEVICE_GetErrorString(code);
        (!ptr.is_null()).then(|| CStr::from_ptr(ptr).to_string_lossy().into_owned())
    };
    let status = DriverStatus::new(code);
    match message {
        Some(message) => status.with_message(message),
        None => status,
    }
}

fn check(code: sys::ReturnStatus) -> DriverResult<()> {
    if code == sys::noError {
        Ok(())
    } else {
        Err(status_of(code))
    }
}

/// Decode a library-owned wide string.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated wide string that stays
/// valid for the duration of the call.
unsafe fn wide_to_path(ptr: *const sys::wchar_t) -> Option<PathBuf> {
    if ptr.is_null() {
        return None;
    }
    let mut len = 0;
    while len < MAX_WIDE_FILENAME && *ptr.add(len) != 0 {
        len += 1;
    }
    let text = wire::decode_wide(std::slice::from_raw_parts(ptr, len));
    (!text.is_empty()).then(|| PathBuf::from(text))
}

/// Safe handle on the vendor library.
#[derive(Debug)]
pub struct RsaApiDriver {
    _claim: (),
}

impl RsaApiDriver {
    /// Claim the vendor library for this process.
    ///
    /// # Errors
    ///
    /// [`RsaError::ConnectFailure`] when another driver already holds it.
    pub fn open() -> Result<Self> {
        if LIBRARY_CLAIMED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RsaError::ConnectFailure {
                device_id: -1,
                status: DriverStatus::new(local_status::RESOURCE_BUSY)
                    .with_message("RSA API is already in use by another driver"),
            });
        }
        debug!("RSA API claimed");
        Ok(Self { _claim: () })
    }
}

impl Drop for RsaApiDriver {
    fn drop(&mut self) {
        LIBRARY_CLAIMED.store(false, Ordering::SeqCst);
        debug!("RSA API released");
    }
}

type WaitFn = unsafe extern "C" fn(c_int, *mut bool) -> sys::ReturnStatus;

fn wait_flag(call: WaitFn, timeout_ms: u32) -> DriverResult<bool> {
    let timeout = c_int::try_from(timeout_ms).unwrap_or(c_int::MAX);
    let mut ready = false;
    // SAFETY: `ready` is a valid out pointer for the duration of the call.
    check(unsafe { call(timeout, &mut ready) })?;
    Ok(ready)
}

impl AnalyzerDriver for RsaApiDriver {
    fn api_version(&mut self) -> DriverResult<String> {
        let mut buffer = [0 as c_char; sys::DEVINFO_MAX_STRLEN];
        // SAFETY: buffer holds DEVINFO_MAX_STRLEN chars as the API requires.
        check(unsafe { sys::DEVICE_GetAPIVersion(buffer.as_mut_ptr()) })?;
        Ok(wire::decode_c_chars(&buffer))
    }

    fn search(&mut self) -> DriverResult<Vec<DeviceRecord>> {
        let mut count: c_int = 0;
        let mut ids = [0 as c_int; sys::DEVSRCH_MAX_NUM_DEVICES];
        let mut serials =
            [[0 as c_char; sys::DEVSRCH_SERIAL_MAX_STRLEN]; sys::DEVSRCH_MAX_NUM_DEVICES];
        let mut types =
            [[0 as c_char; sys::DEVSRCH_TYPE_MAX_STRLEN]; sys::DEVSRCH_MAX_NUM_DEVICES];
        // SAFETY: all arrays are sized to the DEVSRCH_* limits.
        check(unsafe {
            sys::DEVICE_Search(
                &mut count,
                ids.as_mut_ptr(),
                serials.as_mut_ptr(),
                types.as_mut_ptr(),
            )
        })?;
        Ok(wire::decode_devices(count, &ids, &serials, &types)?)
    }

    fn connect(&mut self, device_id: i32) -> DriverResult<()> {
        // SAFETY: plain value call.
        check(unsafe { sys::DEVICE_Connect(device_id) })?;
        info!(device_id, "RSA API connected");
        Ok(())
    }

    fn disconnect(&mut self) -> DriverResult<()> {
        // SAFETY: plain call; valid in any connection state.
        check(unsafe { sys::DEVICE_Disconnect() })
    }

    fn preset(&mut self) -> DriverResult<()> {
        // SAFETY: plain call.
        check(unsafe { sys::CONFIG_Preset() })
    }

    fn run(&mut self) -> DriverResult<()> {
        // SAFETY: plain call.
        check(unsafe { sys::DEVICE_Run() })
    }

    fn stop(&mut self) -> DriverResult<()> {
        // SAFETY: plain call.
        check(unsafe { sys::DEVICE_Stop() })
    }

    fn set_center_frequency(&mut self, hz: f64) -> DriverResult<()> {
        // SAFETY: plain value call.
        check(unsafe { sys::CONFIG_SetCenterFreq(hz as c_double) })
    }

    fn set_reference_level(&mut self, dbm: f64) -> DriverResult<()> {
        // SAFETY: plain value call.
        check(unsafe { sys::CONFIG_SetReferenceLevel(dbm as c_double) })
    }

    fn spectrum_set_enable(&mut self, enable: bool) -> DriverResult<()> {
        // SAFETY: plain value call.
        check(unsafe { sys::SPECTRUM_SetEnable(enable) })
    }

    fn spectrum_set_default(&mut self) -> DriverResult<()> {
        // SAFETY: plain call.
        check(unsafe { sys::SPECTRUM_SetDefault() })
    }

    fn set_spectrum_settings(&mut self, settings: &SpectrumSettings) -> DriverResult<()> {
        let raw = wire::encode_settings(settings)?;
        // SAFETY: the record is passed by value.
        check(unsafe { sys::SPECTRUM_SetSettings(raw) })
    }

    fn spectrum_settings(&mut self) -> DriverResult<SpectrumSettings> {
        let mut raw = sys::Spectrum_Settings::default();
        // SAFETY: `raw` is a valid out pointer.
        check(unsafe { sys::SPECTRUM_GetSettings(&mut raw) })?;
        Ok(wire::decode_settings(&raw)?)
    }

    fn acquire_trace(&mut self) -> DriverResult<()> {
        // SAFETY: plain call.
        check(unsafe { sys::SPECTRUM_AcquireTrace() })
    }

    fn wait_for_trace_ready(&mut self, timeout_ms: u32) -> DriverResult<bool> {
        wait_flag(sys::SPECTRUM_WaitForDataReady, timeout_ms)
    }

    fn get_trace(&mut self, trace: TraceSelector, buffer: &mut [f32]) -> DriverResult<usize> {
        let max_points = wire::encode_length("trace buffer", buffer.len())?;
        let mut out_points: c_int = 0;
        // SAFETY: `buffer` holds `max_points` floats; `out_points` is a
        // valid out pointer.
        check(unsafe {
            sys::SPECTRUM_GetTrace(
                wire::encode_trace(trace),
                max_points,
                buffer.as_mut_ptr(),
                &mut out_points,
            )
        })?;
        Ok(wire::decode_count("outTracePoints", out_points)?)
    }

    fn trace_info(&mut self) -> DriverResult<TraceInfo> {
        let mut raw = sys::Spectrum_TraceInfo::default();
        // SAFETY: `raw` is a valid out pointer.
        check(unsafe { sys::SPECTRUM_GetTraceInfo(&mut raw) })?;
        Ok(wire::decode_trace_info(&raw))
    }

    fn set_iq_acquisition_parameters(&mut self, params: &IqBlockParameters) -> DriverResult<()> {
        let record_length = wire::encode_length("IQ record length", params.record_length)?;
        // SAFETY: plain value calls.
        unsafe {
            check(sys::IQBLK_SetIQBandwidth(params.bandwidth_hz))?;
            check(sys::IQBLK_SetIQRecordLength(record_length))?;
            check(sys::TRIG_SetTriggerMode(wire::encode_trigger_mode(
                params.trigger_mode,
            )))?;
            if params.trigger_mode == TriggerMode::Triggered {
                check(sys::TRIG_SetIFPowerTriggerLevel(params.trigger_level_dbm))?;
            }
        }
        Ok(())
    }

    fn iq_sample_rate(&mut self) -> DriverResult<f64> {
        let mut rate: c_double = 0.0;
        // SAFETY: `rate` is a valid out pointer.
        check(unsafe { sys::IQBLK_GetIQSampleRate(&mut rate) })?;
        Ok(rate)
    }

    fn acquire_iq(&mut self) -> DriverResult<()> {
        // SAFETY: plain call.
        check(unsafe { sys::IQBLK_AcquireIQData() })
    }

    fn wait_for_iq_ready(&mut self, timeout_ms: u32) -> DriverResult<bool> {
        wait_flag(sys::IQBLK_WaitForIQDataReady, timeout_ms)
    }

    fn iq_acq_info(&mut self) -> DriverResult<IqAcqInfo> {
        let mut raw = sys::IQBLK_ACQINFO::default();
        // SAFETY: `raw` is a valid out pointer.
        check(unsafe { sys::IQBLK_GetIQAcqInfo(&mut raw) })?;
        Ok(wire::decode_iq_acq_info(&raw))
    }

    fn get_iq_data_deinterleaved(
        &mut self,
        start_index: usize,
        i_data: &mut [f32],
        q_data: &mut [f32],
    ) -> DriverResult<usize> {
        let wanted = i_data.len().min(q_data.len());
        // The library always reads from the start of the record.
        let total = start_index + wanted;
        let request = wire::encode_length("IQ request length", total)?;
        let mut i_all = vec![0.0f32; total];
        let mut q_all = vec![0.0f32; total];
        let mut out_length: c_int = 0;
        // SAFETY: both buffers hold `request` floats; `out_length` is a valid
        // out pointer.
        check(unsafe {
            sys::IQBLK_GetIQDataDeinterleaved(
                i_all.as_mut_ptr(),
                q_all.as_mut_ptr(),
                &mut out_length,
                request,
            )
        })?;
        let returned = wire::decode_count("outLength", out_length)?.min(total);
        let count = returned.saturating_sub(start_index);
        i_data[..count].copy_from_slice(&i_all[start_index..start_index + count]);
        q_data[..count].copy_from_slice(&q_all[start_index..start_index + count]);
        Ok(count)
    }

    fn stream_set_acq_bandwidth(&mut self, hz: f64) -> DriverResult<()> {
        // SAFETY: plain value call.
        check(unsafe { sys::IQSTREAM_SetAcqBandwidth(hz) })
    }

    fn stream_acq_parameters(&mut self) -> DriverResult<StreamAcqParameters> {
        let mut bandwidth_hz: c_double = 0.0;
        let mut sample_rate: c_double = 0.0;
        // SAFETY: both are valid out pointers.
        check(unsafe { sys::IQSTREAM_GetAcqParameters(&mut bandwidth_hz, &mut sample_rate) })?;
        Ok(StreamAcqParameters {
            bandwidth_hz,
            sample_rate,
        })
    }

    fn stream_set_output(
        &mut self,
        destination: StreamDestination,
        encoding: SampleEncoding,
    ) -> DriverResult<()> {
        // SAFETY: plain value call.
        check(unsafe {
            sys::IQSTREAM_SetOutputConfiguration(
                wire::encode_destination(destination),
                wire::encode_encoding(encoding),
            )
        })
    }

    fn stream_set_filename_base(&mut self, base: &Path) -> DriverResult<()> {
        let base = CString::new(base.to_string_lossy().into_owned()).map_err(|_| {
            DriverStatus::new(local_status::ENCODE_FAILURE)
                .with_message("filename base contains a NUL byte")
        })?;
        // SAFETY: `base` is NUL-terminated and outlives the call; the library
        // copies it.
        check(unsafe { sys::IQSTREAM_SetDiskFilenameBase(base.as_ptr()) })
    }

    fn stream_set_filename_suffix(&mut self, suffix: FilenameSuffix) -> DriverResult<()> {
        // SAFETY: plain value call.
        check(unsafe { sys::IQSTREAM_SetDiskFilenameSuffix(wire::encode_suffix(suffix)) })
    }

    fn stream_set_file_length(&mut self, msec: u32) -> DriverResult<()> {
        let msec = wire::encode_length("file length", msec as usize)?;
        // SAFETY: plain value call.
        check(unsafe { sys::IQSTREAM_SetDiskFileLength(msec) })
    }

    fn stream_start(&mut self) -> DriverResult<()> {
        // SAFETY: plain call.
        check(unsafe { sys::IQSTREAM_Start() })
    }

    fn stream_stop(&mut self) -> DriverResult<()> {
        // SAFETY: plain call.
        check(unsafe { sys::IQSTREAM_Stop() })
    }

    fn stream_write_status(&mut self) -> DriverResult<StreamWriteStatus> {
        let mut complete = false;
        let mut writing = false;
        // SAFETY: both are valid out pointers.
        check(unsafe { sys::IQSTREAM_GetDiskFileWriteStatus(&mut complete, &mut writing) })?;
        Ok(StreamWriteStatus { complete, writing })
    }

    fn stream_file_info(&mut self) -> DriverResult<StreamFileInfo> {
        let mut raw = sys::IQSTRMFILEINFO::default();
        // SAFETY: `raw` is a valid out pointer.
        check(unsafe { sys::IQSTREAM_GetDiskFileInfo(&mut raw) })?;

        let mut filenames = Vec::new();
        if !raw.filenames.is_null() {
            for index in [sys::IQSTRM_FILENAME_DATA_IDX, sys::IQSTRM_FILENAME_HEADER_IDX] {
                // SAFETY: `filenames` points at the library's two-entry array
                // of wide strings, valid until the next stream run.
                if let Some(path) = unsafe { wide_to_path(*raw.filenames.add(index)) } {
                    filenames.push(path);
                }
            }
        }
        Ok(wire::decode_stream_file_info(&raw, filenames))
    }
}
