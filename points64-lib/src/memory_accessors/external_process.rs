use std::{ffi::c_void, mem::size_of};

use anyhow::{anyhow, Result};
use windows::Win32::{
    Foundation::{
        CloseHandle, ERROR_ACCESS_DENIED, ERROR_INVALID_HANDLE, ERROR_PARTIAL_COPY, FALSE, HANDLE,
        STILL_ACTIVE,
    },
    System::{
        Diagnostics::{
            Debug::{ReadProcessMemory, WriteProcessMemory},
            ToolHelp::{
                CreateToolhelp32Snapshot, Process32First, Process32Next, PROCESSENTRY32,
                TH32CS_SNAPPROCESS,
            },
        },
        Threading::{
            GetExitCodeProcess, OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION,
            PROCESS_VM_READ, PROCESS_VM_WRITE,
        },
    },
};

use super::{MemoryAccessor, MemoryError};

fn find_process_id_in_snapshot(snapshot: HANDLE, exe_file: &str) -> Option<u32> {
    let mut pe = PROCESSENTRY32 {
        dwSize: size_of::<PROCESSENTRY32>() as u32,
        cntUsage: 0,
        th32ProcessID: 0,
        th32DefaultHeapID: 0,
        th32ModuleID: 0,
        cntThreads: 0,
        th32ParentProcessID: 0,
        pcPriClassBase: 0,
        dwFlags: 0,
        szExeFile: [0; 260],
    };
    if unsafe { Process32First(snapshot, &mut pe) }.is_err() {
        return None;
    }
    let exe_file = exe_file.to_lowercase();
    loop {
        let current = String::from_utf8_lossy(&pe.szExeFile).to_lowercase();
        if current.contains(&exe_file) {
            return Some(pe.th32ProcessID);
        }

        if unsafe { Process32Next(snapshot, &mut pe) }.is_err() {
            return None;
        }
    }
}

pub fn find_process_id(exe_file: &str) -> Result<u32> {
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }?;

    let process_id = find_process_id_in_snapshot(snapshot, exe_file);
    unsafe { CloseHandle(snapshot) }?;

    process_id.ok_or_else(|| anyhow!("Process not found"))
}

fn to_memory_error(err: windows::core::Error) -> MemoryError {
    let code = err.code();
    if code == ERROR_ACCESS_DENIED.to_hresult() || code == ERROR_INVALID_HANDLE.to_hresult() {
        MemoryError::AccessDenied
    } else if code == ERROR_PARTIAL_COPY.to_hresult() {
        MemoryError::UnsupportedMemorySize
    } else {
        MemoryError::Os(err.to_string())
    }
}

pub struct ExternalProcess {
    process: HANDLE,
}

impl ExternalProcess {
    pub fn open(process_id: u32) -> Result<Self> {
        let process = unsafe {
            OpenProcess(
                PROCESS_QUERY_INFORMATION
                    | PROCESS_VM_OPERATION
                    | PROCESS_VM_READ
                    | PROCESS_VM_WRITE,
                FALSE,
                process_id,
            )
        }?;
        Ok(Self { process })
    }
}

impl MemoryAccessor for ExternalProcess {
    fn read(&self, addr: usize, buffer: &mut [u8]) -> Result<(), MemoryError> {
        let mut number_of_bytes_read: usize = 0;
        unsafe {
            ReadProcessMemory(
                self.process,
                addr as *const c_void,
                buffer.as_mut_ptr() as *mut c_void,
                buffer.len(),
                Some(&mut number_of_bytes_read),
            )
        }
        .map_err(to_memory_error)?;
        if number_of_bytes_read != buffer.len() {
            return Err(MemoryError::Os(format!("short read at {addr:#x}")));
        }
        Ok(())
    }

    fn write(&self, addr: usize, buffer: &[u8]) -> Result<(), MemoryError> {
        let mut number_of_bytes_written: usize = 0;
        unsafe {
            WriteProcessMemory(
                self.process,
                addr as *const c_void,
                buffer.as_ptr() as *const c_void,
                buffer.len(),
                Some(&mut number_of_bytes_written),
            )
        }
        .map_err(to_memory_error)?;
        if number_of_bytes_written != buffer.len() {
            return Err(MemoryError::Os(format!("short write at {addr:#x}")));
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        let mut exit_code = 0u32;
        unsafe { GetExitCodeProcess(self.process, &mut exit_code) }.is_ok()
            && exit_code == STILL_ACTIVE.0 as u32
    }
}

impl Drop for ExternalProcess {
    fn drop(&mut self) {
        if let Err(err) = unsafe { CloseHandle(self.process) } {
            tracing::warn!("CloseHandle failed: {err}");
        }
    }
}
