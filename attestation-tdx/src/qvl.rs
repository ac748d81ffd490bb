//! Lazy FFI binding to Intel's Quote Verification Library (QVL).
//!
//! The shared object is loaded at most once per process. A tri-state latch
//! records whether loading has not been attempted, succeeded, or failed, so
//! an absent library is probed exactly once and every later caller sees the
//! same answer. Collateral is fetched by the library itself through its QCNL
//! configuration; this binding never passes collateral explicitly.

use libloading::{Library, Symbol};
use std::os::raw::c_void;
use std::ptr;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// `sgx_qv_get_quote_supplemental_data_size`
type GetSupplementalDataSizeFn = unsafe extern "C" fn(p_data_size: *mut u32) -> i32;

/// `sgx_qv_verify_quote`
type VerifyQuoteFn = unsafe extern "C" fn(
    p_quote: *const u8,
    quote_size: u32,
    p_quote_collateral: *const c_void,
    expiration_check_date: i64,
    p_collateral_expiration_status: *mut u32,
    p_quote_verification_result: *mut u32,
    p_qve_report_info: *mut c_void,
    supplemental_data_size: u32,
    p_supplemental_data: *mut u8,
) -> i32;

#[derive(Debug, Error)]
pub enum QvlError {
    #[error("QVL symbol lookup failed: {0}")]
    Symbol(String),
}

/// Raw outputs of one `sgx_qv_verify_quote` invocation.
#[derive(Debug, Clone, Copy)]
pub struct QvlVerdict {
    /// Return code of the verify call itself; nonzero means the call failed
    /// before producing a verification result.
    pub return_code: i32,
    /// `sgx_ql_qv_result_t` value written by the library.
    pub verification_result: u32,
    /// Nonzero when some collateral had expired at the check date.
    pub collateral_expiration_status: u32,
}

/// An open handle to the QVL shared object.
pub struct Qvl {
    library: Library,
}

impl Qvl {
    /// Run quote verification with library-fetched collateral.
    ///
    /// The call blocks on PCCS collateral fetches (typically 100 ms - 1 s);
    /// callers on a cooperative runtime must offload it to a blocking worker.
    pub fn verify(&self, quote: &[u8], expiration_check_date: i64) -> Result<QvlVerdict, QvlError> {
        let get_size: Symbol<'_, GetSupplementalDataSizeFn> = unsafe {
            self.library
                .get(b"sgx_qv_get_quote_supplemental_data_size\0")
                .map_err(|e| QvlError::Symbol(e.to_string()))?
        };
        let verify: Symbol<'_, VerifyQuoteFn> = unsafe {
            self.library
                .get(b"sgx_qv_verify_quote\0")
                .map_err(|e| QvlError::Symbol(e.to_string()))?
        };

        let mut supplemental_size: u32 = 0;
        let rc = unsafe { get_size(&mut supplemental_size) };
        if rc != 0 {
            // Verification still proceeds, just without supplemental data.
            supplemental_size = 0;
        }

        let mut supplemental = vec![0u8; supplemental_size as usize];
        let mut collateral_expiration_status: u32 = 0;
        let mut verification_result: u32 = 0;

        let return_code = unsafe {
            verify(
                quote.as_ptr(),
                quote.len() as u32,
                ptr::null(), // collateral auto-fetched from the configured PCCS
                expiration_check_date,
                &mut collateral_expiration_status,
                &mut verification_result,
                ptr::null_mut(), // no QvE report
                supplemental_size,
                if supplemental.is_empty() {
                    ptr::null_mut()
                } else {
                    supplemental.as_mut_ptr()
                },
            )
        };

        Ok(QvlVerdict {
            return_code,
            verification_result,
            collateral_expiration_status,
        })
    }
}

enum LoadState {
    Unloaded,
    Loaded(Arc<Qvl>),
    Unavailable,
}

/// Load-once holder for the QVL handle.
pub struct QvlLoader {
    library_path: String,
    state: Mutex<LoadState>,
}

impl QvlLoader {
    pub fn new(library_path: impl Into<String>) -> Self {
        Self {
            library_path: library_path.into(),
            state: Mutex::new(LoadState::Unloaded),
        }
    }

    /// The handle, loading the library on first call. Returns `None` when the
    /// library is not loadable on this host; the outcome is latched either
    /// way.
    pub fn get(&self) -> Option<Arc<Qvl>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        match &*state {
            LoadState::Loaded(qvl) => return Some(Arc::clone(qvl)),
            LoadState::Unavailable => return None,
            LoadState::Unloaded => {}
        }

        match unsafe { Library::new(&self.library_path) } {
            Ok(library) => {
                tracing::info!("Loaded DCAP QVL from {}", self.library_path);
                let qvl = Arc::new(Qvl { library });
                *state = LoadState::Loaded(Arc::clone(&qvl));
                Some(qvl)
            }
            Err(e) => {
                tracing::warn!("DCAP QVL not available at {}: {e}", self.library_path);
                *state = LoadState::Unavailable;
                None
            }
        }
    }

    /// Whether the library loaded (probing it if necessary).
    pub fn is_available(&self) -> bool {
        self.get().is_some()
    }
}
