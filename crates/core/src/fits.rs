//! FITS primary-header access over `fitsio` (cfitsio).
//!
//! Pixel data is never touched. Reads look up named keywords in the primary
//! HDU; updates replace those keywords in place.

use std::collections::BTreeMap;
use std::ffi::CString;
use std::path::Path;

use fitsio::FitsFile;

use crate::error::CoreError;

/// cfitsio status for a keyword that is not in the header.
const KEY_NO_EXIST: i32 = 202;

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A typed header value.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Str(String),
    Int(i64),
    Float(f64),
    /// Absent value. Writing it removes the keyword.
    Undefined,
}

impl HeaderValue {
    /// Numeric view of the value. Strings are parsed leniently because some
    /// capture programs quote their numbers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) if f.is_finite() => Some(*f),
            Self::Str(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    /// Integer view of the value. Floats qualify only when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            Self::Str(s) => {
                let s = s.trim();
                s.parse::<i64>().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite() && f.fract() == 0.0)
                        .map(|f| f as i64)
                })
            }
            _ => None,
        }
    }

    /// Textual view of the value. Undefined values are not text.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s.clone()),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Undefined => None,
        }
    }
}

// ---------------------------------------------------------------------------
// File access
// ---------------------------------------------------------------------------

fn fits_error(path: &Path) -> impl FnOnce(fitsio::errors::Error) -> CoreError + '_ {
    move |source| CoreError::fits(path, source)
}

/// Read `keywords` from the primary header of the FITS file at `path`.
///
/// Keywords missing from the header, or present without a value, are left
/// out of the map. Numeric values come back as [`HeaderValue::Float`];
/// anything cfitsio cannot read as a number comes back as text.
pub fn read_header(path: &Path, keywords: &[&str]) -> Result<BTreeMap<String, HeaderValue>, CoreError> {
    let mut file = FitsFile::open(path).map_err(fits_error(path))?;
    let hdu = file.primary_hdu().map_err(fits_error(path))?;

    let mut header = BTreeMap::new();
    for &keyword in keywords {
        let value = match hdu.read_key::<f64>(&mut file, keyword) {
            Ok(number) => Some(HeaderValue::Float(number)),
            Err(_) => hdu
                .read_key::<String>(&mut file, keyword)
                .ok()
                .map(HeaderValue::Str),
        };
        if let Some(value) = value {
            header.insert(keyword.to_string(), value);
        }
    }
    Ok(header)
}

/// Replace keywords in the primary header of an existing FITS file.
///
/// Each keyword is removed first so the header never carries duplicates.
/// [`HeaderValue::Undefined`] only removes.
pub fn update_header(path: &Path, updates: &[(String, HeaderValue)]) -> Result<(), CoreError> {
    let mut file = FitsFile::edit(path).map_err(fits_error(path))?;
    let hdu = file.primary_hdu().map_err(fits_error(path))?;

    for (keyword, value) in updates {
        delete_key(&mut file, keyword).map_err(fits_error(path))?;
        match value {
            HeaderValue::Str(s) => hdu.write_key(&mut file, keyword, s.clone()),
            HeaderValue::Int(i) => hdu.write_key(&mut file, keyword, *i),
            HeaderValue::Float(f) => hdu.write_key(&mut file, keyword, *f),
            HeaderValue::Undefined => Ok(()),
        }
        .map_err(fits_error(path))?;
    }
    Ok(())
}

/// Create a FITS file holding only an empty primary HDU, replacing any
/// file already at `path`.
pub fn create_empty(path: &Path) -> Result<(), CoreError> {
    if path.exists() {
        std::fs::remove_file(path).map_err(|e| CoreError::io(path, e))?;
    }
    FitsFile::create(path).open().map_err(fits_error(path))?;
    Ok(())
}

/// Remove `keyword` from the current HDU. A missing keyword is not an error.
fn delete_key(file: &mut FitsFile, keyword: &str) -> Result<(), fitsio::errors::Error> {
    let name = CString::new(keyword)?;
    let mut status = 0;
    // SAFETY: `file` is open for writing and `name` outlives the call.
    unsafe {
        fitsio::sys::ffdkey(file.as_raw(), name.as_ptr(), &mut status);
    }
    match status {
        0 | KEY_NO_EXIST => Ok(()),
        status => Err(fitsio::errors::Error::Fits(fitsio::errors::FitsError {
            status,
            message: format!("failed to delete keyword {keyword}"),
        })),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
