#![allow(non_snake_case)]

use std::ffi::{CStr, CString};
use std::fmt::{Display, Formatter};
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dlopen::wrapper::{Container, WrapperApi};
use thiserror::Error;

use crate::protocol::scpi::strip_termination;
use crate::protocol::{ScpiRequest, ScpiResponse};
use crate::transport::terminate;

#[derive(Error, Clone, Debug)]
pub struct VisaError {
    desc: String,
    code: i32,
}

pub type VisaResult<T> = std::result::Result<T, VisaError>;

impl Display for VisaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("VisaError({}): `{}`", self.code, self.desc))
    }
}

impl VisaError {
    fn new(lib: &VisaLibrary, code: ViStatus) -> Self {
        Self {
            desc: lib.describe_status(code),
            code,
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }
}

impl From<VisaError> for crate::Error {
    fn from(err: VisaError) -> Self {
        if err.code == VI_ERROR_TMO {
            crate::Error::protocol_timeout()
        } else {
            crate::Error::transport(anyhow::Error::new(err))
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        const DEFAULT_VISA_LIB: &str = "visa64.dll";
    } else if #[cfg(target_os = "macos")] {
        const DEFAULT_VISA_LIB: &str = "/Library/Frameworks/VISA.framework/VISA";
    } else {
        const DEFAULT_VISA_LIB: &str = "libvisa.so";
    }
}

type ViStatus = i32;
type ViAccessMode = u32;
type ViSession = u32;
type ViObject = u32;
type ViFindList = u32;
type ViAttr = u32;
type ViAttrState = u64;

const VI_SUCCESS_MAX_CNT: ViStatus = 0x3FFF0006;
const VI_ERROR_TMO: ViStatus = 0xBFFF0015_u32 as i32;
const VI_ERROR_RSRC_NFOUND: ViStatus = 0xBFFF0011_u32 as i32;
const VI_ATTR_TMO_VALUE: ViAttr = 0x3FFF001A;
const VI_FIND_BUFLEN: usize = 256;
const VI_NULL: ViAccessMode = 0;

/// Size of a single `viRead` call. Larger replies are assembled from several chunks.
const READ_CHUNK: usize = 20 * 1024;

#[derive(WrapperApi)]
struct Api {
    viOpenDefaultRM: unsafe extern "C" fn(vi: *mut ViSession) -> ViStatus,
    viFindRsrc: unsafe extern "C" fn(
        session: ViSession,
        expr: *const c_char,
        find_list: *mut ViFindList,
        ret_cnt: *mut u32,
        desc: *mut c_char,
    ) -> ViStatus,
    viFindNext: unsafe extern "C" fn(find_list: ViFindList, desc: *mut c_char) -> ViStatus,
    viOpen: unsafe extern "C" fn(
        session: ViSession,
        rsrc: *const c_char,
        access_mode: ViAccessMode,
        timeout: u32,
        vi: *mut ViObject,
    ) -> ViStatus,
    viClose: unsafe extern "C" fn(vi: ViObject) -> ViStatus,
    viSetAttribute:
        unsafe extern "C" fn(vi: ViObject, attr: ViAttr, value: ViAttrState) -> ViStatus,
    viStatusDesc:
        unsafe extern "C" fn(vi: ViObject, status: ViStatus, value: *mut c_char) -> ViStatus,
    viRead:
        unsafe extern "C" fn(vi: ViSession, buf: *mut u8, cnt: u32, cnt_ret: *mut u32) -> ViStatus,
    viWrite: unsafe extern "C" fn(
        vi: ViSession,
        buf: *const u8,
        cnt: u32,
        cnt_ret: *mut u32,
    ) -> ViStatus,
}

/// The loaded VISA library together with its default resource manager session.
///
/// Created once per process and shared by all sessions opened through it. The resource manager
/// is closed when the last reference goes away.
pub struct VisaLibrary {
    api: Container<Api>,
    rm: ViSession,
    path: PathBuf,
}

// VISA sessions may be used from any thread, the library serializes access internally.
unsafe impl Send for VisaLibrary {}
unsafe impl Sync for VisaLibrary {}

impl VisaLibrary {
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_VISA_LIB)
    }

    pub fn load(path: &Path) -> crate::Result<Self> {
        let api: Container<Api> = unsafe { Container::load(path.as_os_str()) }.map_err(|err| {
            crate::Error::transport(anyhow::anyhow!(
                "Cannot load VISA library `{}`: {}",
                path.display(),
                err
            ))
        })?;
        let mut rm: ViSession = 0;
        let ret = unsafe { api.viOpenDefaultRM(&mut rm as *mut ViSession) };
        if ret < 0 {
            return Err(crate::Error::transport(anyhow::anyhow!(
                "Could not open resource manager: Error Code {}",
                ret
            )));
        }
        log::debug!("Loaded VISA library from {}", path.display());
        Ok(VisaLibrary {
            api,
            rm,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn describe_status(&self, status: ViStatus) -> String {
        let mut data: [c_char; 512] = [0; 512];
        let ret = unsafe { self.api.viStatusDesc(self.rm, status, data.as_mut_ptr()) };
        if ret < 0 {
            return format!("Unknown status {:#x}", status);
        }
        let desc = unsafe { CStr::from_ptr(data.as_ptr()) };
        desc.to_string_lossy().to_string()
    }

    fn check(&self, status: ViStatus) -> VisaResult<ViStatus> {
        if status < 0 {
            Err(VisaError::new(self, status))
        } else {
            Ok(status)
        }
    }

    /// List the resources matching a VISA search expression such as `?*::INSTR`.
    pub fn find_resources(&self, expr: &str) -> crate::Result<Vec<String>> {
        let expr = CString::new(expr).map_err(crate::Error::argument)?;
        let mut find_list: ViFindList = 0;
        let mut count = 0_u32;
        let mut desc: [c_char; VI_FIND_BUFLEN] = [0; VI_FIND_BUFLEN];
        let status = unsafe {
            self.api.viFindRsrc(
                self.rm,
                expr.as_ptr(),
                &mut find_list as *mut ViFindList,
                &mut count as *mut u32,
                desc.as_mut_ptr(),
            )
        };
        if status == VI_ERROR_RSRC_NFOUND {
            return Ok(Vec::new());
        }
        self.check(status)?;

        let mut ret = Vec::with_capacity(count as usize);
        ret.push(unsafe { CStr::from_ptr(desc.as_ptr()) }.to_string_lossy().to_string());
        for _ in 1..count {
            let status = unsafe { self.api.viFindNext(find_list, desc.as_mut_ptr()) };
            self.check(status)?;
            ret.push(unsafe { CStr::from_ptr(desc.as_ptr()) }.to_string_lossy().to_string());
        }
        unsafe { self.api.viClose(find_list) };
        Ok(ret)
    }
}

impl Drop for VisaLibrary {
    fn drop(&mut self) {
        let status = unsafe { self.api.viClose(self.rm) };
        if status < 0 {
            log::warn!("Error closing VISA resource manager: {}", self.describe_status(status));
        }
    }
}

/// A blocking session to one instrument.
pub struct Session {
    lib: Arc<VisaLibrary>,
    instr: ViObject,
    addr: String,
    closed: bool,
}

impl Session {
    pub fn open(lib: Arc<VisaLibrary>, addr: &str, timeout: Duration) -> crate::Result<Session> {
        let cstr = CString::new(addr).map_err(crate::Error::argument)?;
        let tmo = timeout.as_millis().min(u32::MAX as u128 - 1) as u32;
        let mut handle: ViObject = 0;
        let status = unsafe {
            lib.api
                .viOpen(lib.rm, cstr.as_ptr(), VI_NULL, tmo, &mut handle as *mut ViObject)
        };
        lib.check(status)?;
        let status =
            unsafe { lib.api.viSetAttribute(handle, VI_ATTR_TMO_VALUE, tmo as ViAttrState) };
        if let Err(err) = lib.check(status) {
            unsafe { lib.api.viClose(handle) };
            return Err(err.into());
        }
        Ok(Session {
            lib,
            instr: handle,
            addr: addr.to_string(),
            closed: false,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn read_chunk(&self, size: usize) -> VisaResult<(Vec<u8>, ViStatus)> {
        let mut data = vec![0_u8; size];
        let mut actually_read = 0_u32;
        let status = unsafe {
            self.lib
                .api
                .viRead(self.instr, data.as_mut_ptr(), size as u32, &mut actually_read as *mut u32)
        };
        let status = self.lib.check(status)?;
        data.truncate(actually_read as usize);
        Ok((data, status))
    }

    /// Read until the instrument signals the end of the message.
    pub fn read_raw(&self) -> VisaResult<Vec<u8>> {
        let mut ret = Vec::new();
        loop {
            let (chunk, status) = self.read_chunk(READ_CHUNK)?;
            ret.extend_from_slice(&chunk);
            if status != VI_SUCCESS_MAX_CNT {
                break;
            }
        }
        Ok(ret)
    }

    pub fn write(&self, data: &[u8]) -> VisaResult<()> {
        let mut actually_written = 0_u32;
        let status = unsafe {
            self.lib
                .api
                .viWrite(
                    self.instr,
                    data.as_ptr(),
                    data.len() as u32,
                    &mut actually_written as *mut u32,
                )
        };
        self.lib.check(status)?;
        Ok(())
    }

    fn read_string(&self) -> crate::Result<String> {
        let data = self.read_raw()?;
        let ret = String::from_utf8(data)
            .map_err(|_| crate::Error::unexpected_response("Reply is not valid UTF-8"))?;
        Ok(strip_termination(&ret).to_string())
    }

    pub fn handle_scpi(&self, req: ScpiRequest) -> crate::Result<ScpiResponse> {
        match req {
            ScpiRequest::Write(msg) => {
                self.write(terminate(msg).as_bytes())?;
                Ok(ScpiResponse::Done)
            }
            ScpiRequest::QueryString(msg) => {
                self.write(terminate(msg).as_bytes())?;
                self.read_string().map(ScpiResponse::String)
            }
            ScpiRequest::ReadString => self.read_string().map(ScpiResponse::String),
            ScpiRequest::ReadRaw => Ok(ScpiResponse::Binary(self.read_raw()?)),
        }
    }

    pub fn close(&mut self) -> crate::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let status = unsafe { self.lib.api.viClose(self.instr) };
        self.lib.check(status)?;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("Error closing instrument {}: {}", self.addr, err);
        }
    }
}
