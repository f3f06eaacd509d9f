//! Encode/decode boundary between domain types and the driver's
//! fixed-layout records and integer enumerations.
//!
//! Nothing outside the driver layer touches `rsa_api_sys` types. Decoding
//! is strict: an enumeration value the domain does not know, or a negative
//! count, is a [`WireError`] rather than a silently defaulted field.

use std::os::raw::{c_char, c_int};

use rsa_api_sys as sys;
use thiserror::Error;

use super::{DeviceRecord, DriverStatus, StreamFileInfo};
use crate::iq::{IqAcqInfo, TriggerMode};
use crate::spectrum::{SpectrumSettings, SpectrumWindow, TraceInfo, TraceSelector, VerticalUnit};
use crate::streaming::{FilenameSuffix, SampleEncoding, StreamDestination};

use super::local_status;

/// A driver record that cannot be represented in domain types, or a
/// request that cannot be represented in driver types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Unknown `SpectrumWindows` value
    #[error("unknown spectrum window {0}")]
    UnknownWindow(c_int),
    /// Unknown `SpectrumVerticalUnits` value
    #[error("unknown vertical unit {0}")]
    UnknownVerticalUnit(c_int),
    /// A count field was negative
    #[error("negative {field}: {value}")]
    NegativeCount {
        /// Record field
        field: &'static str,
        /// Value received
        value: i64,
    },
    /// A length does not fit the driver's `int`
    #[error("{field} {value} exceeds the driver's range")]
    OutOfRange {
        /// Request field
        field: &'static str,
        /// Value requested
        value: usize,
    },
}

impl From<WireError> for DriverStatus {
    fn from(err: WireError) -> Self {
        let code = match err {
            WireError::OutOfRange { .. } => local_status::ENCODE_FAILURE,
            _ => local_status::DECODE_FAILURE,
        };
        DriverStatus::new(code).with_message(err.to_string())
    }
}

/// `SpectrumWindows` value of a window.
pub fn encode_window(window: SpectrumWindow) -> c_int {
    match window {
        SpectrumWindow::Kaiser => sys::SpectrumWindow_Kaiser,
        SpectrumWindow::Mil6Db => sys::SpectrumWindow_Mil6dB,
        SpectrumWindow::BlackmanHarris => sys::SpectrumWindow_BlackmanHarris,
        SpectrumWindow::Rectangle => sys::SpectrumWindow_Rectangle,
        SpectrumWindow::FlatTop => sys::SpectrumWindow_FlatTop,
        SpectrumWindow::Hann => sys::SpectrumWindow_Hann,
    }
}

/// Window for a `SpectrumWindows` value.
pub fn decode_window(raw: c_int) -> Result<SpectrumWindow, WireError> {
    Ok(match raw {
        sys::SpectrumWindow_Kaiser => SpectrumWindow::Kaiser,
        sys::SpectrumWindow_Mil6dB => SpectrumWindow::Mil6Db,
        sys::SpectrumWindow_BlackmanHarris => SpectrumWindow::BlackmanHarris,
        sys::SpectrumWindow_Rectangle => SpectrumWindow::Rectangle,
        sys::SpectrumWindow_FlatTop => SpectrumWindow::FlatTop,
        sys::SpectrumWindow_Hann => SpectrumWindow::Hann,
        other => return Err(WireError::UnknownWindow(other)),
    })
}

/// `SpectrumVerticalUnits` value of a unit.
pub fn encode_vertical_unit(unit: VerticalUnit) -> c_int {
    match unit {
        VerticalUnit::Dbm => sys::SpectrumVerticalUnit_dBm,
        VerticalUnit::Watt => sys::SpectrumVerticalUnit_Watt,
        VerticalUnit::Volt => sys::SpectrumVerticalUnit_Volt,
        VerticalUnit::Amp => sys::SpectrumVerticalUnit_Amp,
        VerticalUnit::DbmV => sys::SpectrumVerticalUnit_dBmV,
    }
}

/// Unit for a `SpectrumVerticalUnits` value.
pub fn decode_vertical_unit(raw: c_int) -> Result<VerticalUnit, WireError> {
    Ok(match raw {
        sys::SpectrumVerticalUnit_dBm => VerticalUnit::Dbm,
        sys::SpectrumVerticalUnit_Watt => VerticalUnit::Watt,
        sys::SpectrumVerticalUnit_Volt => VerticalUnit::Volt,
        sys::SpectrumVerticalUnit_Amp => VerticalUnit::Amp,
        sys::SpectrumVerticalUnit_dBmV => VerticalUnit::DbmV,
        other => return Err(WireError::UnknownVerticalUnit(other)),
    })
}

/// `SpectrumTraces` value of a trace selector.
pub fn encode_trace(trace: TraceSelector) -> c_int {
    match trace {
        TraceSelector::Trace1 => sys::SpectrumTrace1,
        TraceSelector::Trace2 => sys::SpectrumTrace2,
        TraceSelector::Trace3 => sys::SpectrumTrace3,
    }
}

/// `TriggerMode` value.
pub fn encode_trigger_mode(mode: TriggerMode) -> c_int {
    match mode {
        TriggerMode::FreeRun => sys::freeRun,
        TriggerMode::Triggered => sys::triggered,
    }
}

/// `IQSOUTDEST` value.
pub fn encode_destination(destination: StreamDestination) -> c_int {
    match destination {
        StreamDestination::Client => sys::IQSOD_CLIENT,
        StreamDestination::Tiq => sys::IQSOD_FILE_TIQ,
        StreamDestination::Siq => sys::IQSOD_FILE_SIQ,
        StreamDestination::SiqSplit => sys::IQSOD_FILE_SIQ_SPLIT,
    }
}

/// `IQSOUTDTYPE` value.
pub fn encode_encoding(encoding: SampleEncoding) -> c_int {
    match encoding {
        SampleEncoding::Float32 => sys::IQSODT_SINGLE,
        SampleEncoding::Int32 => sys::IQSODT_INT32,
        SampleEncoding::Int16 => sys::IQSODT_INT16,
    }
}

/// Suffix control value; auto-increment starts at index 0.
pub fn encode_suffix(suffix: FilenameSuffix) -> c_int {
    match suffix {
        FilenameSuffix::None => sys::IQSSDFN_SUFFIX_NONE,
        FilenameSuffix::Timestamp => sys::IQSSDFN_SUFFIX_TIMESTAMP,
        FilenameSuffix::AutoIncrement => sys::IQSSDFN_SUFFIX_INCRINDEX_MIN,
    }
}

/// Convert a buffer length to the driver's `int`.
pub fn encode_length(field: &'static str, value: usize) -> Result<c_int, WireError> {
    c_int::try_from(value).map_err(|_| WireError::OutOfRange { field, value })
}

/// Convert a count returned by the driver.
pub fn decode_count(field: &'static str, value: c_int) -> Result<usize, WireError> {
    usize::try_from(value).map_err(|_| WireError::NegativeCount {
        field,
        value: i64::from(value),
    })
}

/// Driver record for requested settings.
pub fn encode_settings(settings: &SpectrumSettings) -> Result<sys::Spectrum_Settings, WireError> {
    Ok(sys::Spectrum_Settings {
        span: settings.span_hz,
        rbw: settings.rbw_hz,
        enableVBW: settings.enable_vbw,
        vbw: settings.vbw_hz,
        traceLength: encode_length("trace length", settings.trace_length)?,
        window: encode_window(settings.window),
        verticalUnit: encode_vertical_unit(settings.vertical_unit),
        // resolved fields are outputs; the driver ignores them on input
        actualStartFreq: settings.actual_start_freq_hz,
        actualStopFreq: settings.actual_stop_freq_hz,
        actualFreqStepSize: settings.actual_freq_step_hz,
        actualRBW: settings.actual_rbw_hz,
        actualVBW: settings.actual_vbw_hz,
        actualNumIQSamples: c_int::try_from(settings.actual_num_iq_samples).unwrap_or(c_int::MAX),
    })
}

/// Settings from a record filled by `SPECTRUM_GetSettings`.
pub fn decode_settings(raw: &sys::Spectrum_Settings) -> Result<SpectrumSettings, WireError> {
    let actual_num_iq_samples = u32::try_from(raw.actualNumIQSamples).map_err(|_| {
        WireError::NegativeCount {
            field: "actualNumIQSamples",
            value: i64::from(raw.actualNumIQSamples),
        }
    })?;
    Ok(SpectrumSettings {
        span_hz: raw.span,
        rbw_hz: raw.rbw,
        enable_vbw: raw.enableVBW,
        vbw_hz: raw.vbw,
        trace_length: decode_count("traceLength", raw.traceLength)?,
        window: decode_window(raw.window)?,
        vertical_unit: decode_vertical_unit(raw.verticalUnit)?,
        actual_start_freq_hz: raw.actualStartFreq,
        actual_stop_freq_hz: raw.actualStopFreq,
        actual_freq_step_hz: raw.actualFreqStepSize,
        actual_rbw_hz: raw.actualRBW,
        actual_vbw_hz: raw.actualVBW,
        actual_num_iq_samples,
    })
}

/// Trace info from `SPECTRUM_GetTraceInfo`.
pub fn decode_trace_info(raw: &sys::Spectrum_TraceInfo) -> TraceInfo {
    TraceInfo::from_raw(raw.timestamp, raw.acqDataStatus)
}

/// Block IQ header from `IQBLK_GetIQAcqInfo`.
pub fn decode_iq_acq_info(raw: &sys::IQBLK_ACQINFO) -> IqAcqInfo {
    IqAcqInfo {
        sample0_timestamp: raw.sample0Timestamp,
        trigger_sample_index: raw.triggerSampleIndex,
        trigger_timestamp: raw.triggerTimestamp,
        acq_status: raw.acqStatus,
    }
}

/// Decode the scalar fields of a stream file record. File names are
/// decoded separately by the backend, which owns the pointer walk.
pub fn decode_stream_file_info(
    raw: &sys::IQSTRMFILEINFO,
    filenames: Vec<std::path::PathBuf>,
) -> StreamFileInfo {
    StreamFileInfo {
        number_samples: raw.numberSamples,
        sample0_timestamp: raw.sample0Timestamp,
        trigger_sample_index: raw.triggerSampleIndex,
        trigger_timestamp: raw.triggerTimestamp,
        acq_status: raw.acqStatus,
        filenames,
    }
}

/// Text of a NUL-terminated fixed-size `char` array.
pub fn decode_c_chars(raw: &[c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Text of a wide string without its terminator.
pub fn decode_wide(raw: &[sys::wchar_t]) -> String {
    raw.iter()
        .take_while(|&&c| c != 0)
        .map(|&c| {
            u32::try_from(c)
                .ok()
                .and_then(char::from_u32)
                .unwrap_or(char::REPLACEMENT_CHARACTER)
        })
        .collect()
}

/// Decode the parallel arrays filled by `DEVICE_Search`.
pub fn decode_devices(
    count: c_int,
    ids: &[c_int],
    serials: &[[c_char; sys::DEVSRCH_SERIAL_MAX_STRLEN]],
    types: &[[c_char; sys::DEVSRCH_TYPE_MAX_STRLEN]],
) -> Result<Vec<DeviceRecord>, WireError> {
    let count = decode_count("numDevicesFound", count)?
        .min(ids.len())
        .min(serials.len())
        .min(types.len());
    Ok((0..count)
        .map(|i| DeviceRecord {
            id: ids[i],
            serial: decode_c_chars(&serials[i]),
            nomenclature: decode_c_chars(&types[i]),
        })
        .collect())
}
