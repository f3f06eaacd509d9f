//! Low-level FFI bindings for the Tektronix RSA API.
//!
//! This crate provides raw, unsafe bindings to `libRSA_API`, the vendor
//! user-space library for the RSA306/RSA500/RSA600 family of USB real-time
//! spectrum analyzers.
//!
//! # Layout
//!
//! - Fixed-layout records (`Spectrum_Settings`, `Spectrum_TraceInfo`,
//!   `IQSTRMFILEINFO`, `IQBLK_ACQINFO`) are always available so that the
//!   encode/decode layer in `rsa_spectrum` can be tested without the SDK.
//! - Enumeration values are exposed as flat integer constants.
//! - The `extern "C"` function block is only compiled with the `rsa-sdk`
//!   feature, which also links `libRSA_API`.
//!
//! # Safety
//!
//! All functions in this crate are `unsafe` as they are direct FFI bindings.
//! For a safe wrapper, use the `rsa_spectrum` crate with the `hardware`
//! feature instead.
//!
//! # Features
//!
//! - `rsa-sdk`: Declare and link the vendor functions.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(missing_docs)]
#![allow(clippy::all)]

use std::os::raw::{c_double, c_int};

pub use libc::wchar_t;

/// Status code returned by every API call. Zero means success.
pub type ReturnStatus = c_int;

pub const noError: ReturnStatus = 0;

// Device search limits
pub const DEVSRCH_MAX_NUM_DEVICES: usize = 20;
pub const DEVSRCH_SERIAL_MAX_STRLEN: usize = 100;
pub const DEVSRCH_TYPE_MAX_STRLEN: usize = 20;
pub const DEVINFO_MAX_STRLEN: usize = 100;

// SpectrumWindows
pub const SpectrumWindow_Kaiser: c_int = 0;
pub const SpectrumWindow_Mil6dB: c_int = 1;
pub const SpectrumWindow_BlackmanHarris: c_int = 2;
pub const SpectrumWindow_Rectangle: c_int = 3;
pub const SpectrumWindow_FlatTop: c_int = 4;
pub const SpectrumWindow_Hann: c_int = 5;

// SpectrumVerticalUnits
pub const SpectrumVerticalUnit_dBm: c_int = 0;
pub const SpectrumVerticalUnit_Watt: c_int = 1;
pub const SpectrumVerticalUnit_Volt: c_int = 2;
pub const SpectrumVerticalUnit_Amp: c_int = 3;
pub const SpectrumVerticalUnit_dBmV: c_int = 4;

// SpectrumTraces
pub const SpectrumTrace1: c_int = 0;
pub const SpectrumTrace2: c_int = 1;
pub const SpectrumTrace3: c_int = 2;

// Spectrum_TraceInfo.acqDataStatus bits
pub const AcqDataStatus_ADC_OVERRANGE: u16 = 0x1;
pub const AcqDataStatus_REF_FREQ_UNLOCK: u16 = 0x2;
pub const AcqDataStatus_ADC_DATA_LOST: u16 = 0x20;

// TriggerMode
pub const freeRun: c_int = 0;
pub const triggered: c_int = 1;

// IQSOUTDEST
pub const IQSOD_CLIENT: c_int = 0;
pub const IQSOD_FILE_TIQ: c_int = 1;
pub const IQSOD_FILE_SIQ: c_int = 2;
pub const IQSOD_FILE_SIQ_SPLIT: c_int = 3;

// IQSOUTDTYPE
pub const IQSODT_SINGLE: c_int = 0;
pub const IQSODT_INT32: c_int = 1;
pub const IQSODT_INT16: c_int = 2;

// IQSTREAM_SetDiskFilenameSuffix control values
pub const IQSSDFN_SUFFIX_NONE: c_int = -2;
pub const IQSSDFN_SUFFIX_TIMESTAMP: c_int = -1;
pub const IQSSDFN_SUFFIX_INCRINDEX_MIN: c_int = 0;

// IQSTRMFILEINFO.acqStatus bits. The low bits report the condition during the
// last block; the same flags shifted by IQSTRM_STATUS_STICKY_SHIFT are sticky
// over the whole run.
pub const IQSTRM_STATUS_OVERRANGE: u32 = 1 << 0;
pub const IQSTRM_STATUS_XFER_DISCONTINUITY: u32 = 1 << 1;
pub const IQSTRM_STATUS_IBUFF75PCT: u32 = 1 << 2;
pub const IQSTRM_STATUS_IBUFFOVFLOW: u32 = 1 << 3;
pub const IQSTRM_STATUS_OBUFF75PCT: u32 = 1 << 4;
pub const IQSTRM_STATUS_OBUFFOVFLOW: u32 = 1 << 5;
pub const IQSTRM_STATUS_NONSTICKY_SHIFT: u32 = 0;
pub const IQSTRM_STATUS_STICKY_SHIFT: u32 = 16;

// Index of the data and header file names in IQSTRMFILEINFO.filenames
pub const IQSTRM_FILENAME_DATA_IDX: usize = 0;
pub const IQSTRM_FILENAME_HEADER_IDX: usize = 1;

/// Spectrum measurement settings.
///
/// The first seven fields are requested values, the `actual*` fields are
/// filled in by `SPECTRUM_GetSettings` after the device resolves them.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Spectrum_Settings {
    pub span: c_double,
    pub rbw: c_double,
    pub enableVBW: bool,
    pub vbw: c_double,
    pub traceLength: c_int,
    pub window: c_int,
    pub verticalUnit: c_int,
    pub actualStartFreq: c_double,
    pub actualStopFreq: c_double,
    pub actualFreqStepSize: c_double,
    pub actualRBW: c_double,
    pub actualVBW: c_double,
    pub actualNumIQSamples: c_int,
}

/// Per-trace timestamp and acquisition status.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Spectrum_TraceInfo {
    pub timestamp: i64,
    pub acqDataStatus: u16,
}

/// Result record of a completed IQ streaming-to-disk run.
///
/// `filenames` points at an array of two wide strings owned by the
/// library: the data file and the header file.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct IQSTRMFILEINFO {
    pub numberSamples: u64,
    pub sample0Timestamp: u64,
    pub triggerSampleIndex: u64,
    pub triggerTimestamp: u64,
    pub acqStatus: u32,
    pub filenames: *mut *mut wchar_t,
}

impl Default for IQSTRMFILEINFO {
    fn default() -> Self {
        Self {
            numberSamples: 0,
            sample0Timestamp: 0,
            triggerSampleIndex: 0,
            triggerTimestamp: 0,
            acqStatus: 0,
            filenames: std::ptr::null_mut(),
        }
    }
}

/// Acquisition header of a block IQ record.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct IQBLK_ACQINFO {
    pub sample0Timestamp: u64,
    pub triggerSampleIndex: u64,
    pub triggerTimestamp: u64,
    pub acqStatus: u32,
}

#[cfg(feature = "rsa-sdk")]
mod functions {
    use super::*;
    use std::os::raw::c_char;

    extern "C" {
        // Device
        pub fn DEVICE_GetAPIVersion(apiVersion: *mut c_char) -> ReturnStatus;
        pub fn DEVICE_GetErrorString(status: ReturnStatus) -> *const c_char;
        pub fn DEVICE_Search(
            numDevicesFound: *mut c_int,
            deviceIDs: *mut c_int,
            deviceSerial: *mut [c_char; DEVSRCH_SERIAL_MAX_STRLEN],
            deviceType: *mut [c_char; DEVSRCH_TYPE_MAX_STRLEN],
        ) -> ReturnStatus;
        pub fn DEVICE_Connect(deviceID: c_int) -> ReturnStatus;
        pub fn DEVICE_Disconnect() -> ReturnStatus;
        pub fn DEVICE_Run() -> ReturnStatus;
        pub fn DEVICE_Stop() -> ReturnStatus;

        // Config
        pub fn CONFIG_Preset() -> ReturnStatus;
        pub fn CONFIG_SetCenterFreq(cf: c_double) -> ReturnStatus;
        pub fn CONFIG_SetReferenceLevel(refLevel: c_double) -> ReturnStatus;

        // Spectrum
        pub fn SPECTRUM_SetEnable(enable: bool) -> ReturnStatus;
        pub fn SPECTRUM_SetDefault() -> ReturnStatus;
        pub fn SPECTRUM_SetSettings(settings: Spectrum_Settings) -> ReturnStatus;
        pub fn SPECTRUM_GetSettings(settings: *mut Spectrum_Settings) -> ReturnStatus;
        pub fn SPECTRUM_AcquireTrace() -> ReturnStatus;
        pub fn SPECTRUM_WaitForDataReady(timeoutMsec: c_int, ready: *mut bool) -> ReturnStatus;
        pub fn SPECTRUM_GetTrace(
            trace: c_int,
            maxTracePoints: c_int,
            traceData: *mut f32,
            outTracePoints: *mut c_int,
        ) -> ReturnStatus;
        pub fn SPECTRUM_GetTraceInfo(traceInfo: *mut Spectrum_TraceInfo) -> ReturnStatus;

        // Block IQ
        pub fn IQBLK_SetIQBandwidth(iqBandwidth: c_double) -> ReturnStatus;
        pub fn IQBLK_SetIQRecordLength(recordLength: c_int) -> ReturnStatus;
        pub fn IQBLK_GetIQSampleRate(iqSampleRate: *mut c_double) -> ReturnStatus;
        pub fn IQBLK_AcquireIQData() -> ReturnStatus;
        pub fn IQBLK_WaitForIQDataReady(timeoutMsec: c_int, ready: *mut bool) -> ReturnStatus;
        pub fn IQBLK_GetIQAcqInfo(acqInfo: *mut IQBLK_ACQINFO) -> ReturnStatus;
        pub fn IQBLK_GetIQDataDeinterleaved(
            iData: *mut f32,
            qData: *mut f32,
            outLength: *mut c_int,
            reqLength: c_int,
        ) -> ReturnStatus;

        // Trigger
        pub fn TRIG_SetTriggerMode(mode: c_int) -> ReturnStatus;
        pub fn TRIG_SetIFPowerTriggerLevel(level: c_double) -> ReturnStatus;

        // IQ streaming
        pub fn IQSTREAM_SetAcqBandwidth(bwHz_req: c_double) -> ReturnStatus;
        pub fn IQSTREAM_GetAcqParameters(bwHz_act: *mut c_double, srSps: *mut c_double) -> ReturnStatus;
        pub fn IQSTREAM_SetOutputConfiguration(dest: c_int, dtype: c_int) -> ReturnStatus;
        pub fn IQSTREAM_SetDiskFilenameBase(filenameBase: *const c_char) -> ReturnStatus;
        pub fn IQSTREAM_SetDiskFilenameSuffix(suffixCtl: c_int) -> ReturnStatus;
        pub fn IQSTREAM_SetDiskFileLength(msec: c_int) -> ReturnStatus;
        pub fn IQSTREAM_Start() -> ReturnStatus;
        pub fn IQSTREAM_Stop() -> ReturnStatus;
        pub fn IQSTREAM_GetDiskFileWriteStatus(isComplete: *mut bool, isWriting: *mut bool) -> ReturnStatus;
        pub fn IQSTREAM_GetDiskFileInfo(fileinfo: *mut IQSTRMFILEINFO) -> ReturnStatus;
    }
}

#[cfg(feature = "rsa-sdk")]
pub use functions::*;
