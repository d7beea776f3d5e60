//! `WM_DISPLAYCHANGE` notifications through a message-only window.

use std::sync::Mutex;
use std::sync::mpsc;

use anyhow::Context;
use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CREATESTRUCTW, CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW,
    GWLP_USERDATA, GetMessageW, GetWindowLongPtrW, HWND_MESSAGE, MSG, PostMessageW,
    PostQuitMessage, RegisterClassW, SetWindowLongPtrW, TranslateMessage, WM_CLOSE, WM_CREATE,
    WM_DISPLAYCHANGE, WM_USER, WNDCLASSW, WS_OVERLAPPED,
};

use crate::backend::DisplayChangeCallback;
use crate::error::{CaptureError, CaptureResult};

/// Posted to the listener window to end its message loop.
const WM_QUIT_LISTENER: u32 = WM_USER + 1;

const CLASS_NAME: &str = "SnowPickerDisplayChangeListener";

/// Owned by the listener thread's window through `GWLP_USERDATA`. Boxed so
/// its address is stable for the life of the listener.
struct ListenerContext {
    on_change: DisplayChangeCallback,
}

/// Runs `on_change` on a dedicated thread whenever Windows reports a
/// display configuration change. Dropping it stops and joins the thread.
pub(crate) struct DisplayChangeListener {
    hwnd: Mutex<Option<HWND>>,
    join: Mutex<Option<std::thread::JoinHandle<()>>>,
    _context: Box<ListenerContext>,
}

// SAFETY: HWND is a raw pointer wrapper, but it is only used to post a
// message from the owning process, and the thread that owns the window is
// joined on drop.
unsafe impl Send for DisplayChangeListener {}
unsafe impl Sync for DisplayChangeListener {}

impl DisplayChangeListener {
    pub(crate) fn spawn(on_change: DisplayChangeCallback) -> CaptureResult<Self> {
        let context = Box::new(ListenerContext { on_change });
        let context_ptr = &*context as *const ListenerContext as usize;

        // HWND is not Send, so the raw pointer travels as isize.
        let (hwnd_tx, hwnd_rx) = mpsc::channel::<CaptureResult<isize>>();
        let join = std::thread::Builder::new()
            .name("snow-picker-display-listener".to_string())
            .spawn(move || listener_thread_main(context_ptr, hwnd_tx))
            .map_err(|e| {
                CaptureError::Platform(anyhow::anyhow!(
                    "failed to spawn display change listener thread: {e}"
                ))
            })?;

        let hwnd_raw = hwnd_rx
            .recv()
            .map_err(|_| {
                CaptureError::Platform(anyhow::anyhow!(
                    "display change listener exited before creating its window"
                ))
            })
            .and_then(|created| created);
        let hwnd_raw = match hwnd_raw {
            Ok(raw) => raw,
            Err(e) => {
                let _ = join.join();
                return Err(e);
            }
        };

        log::debug!("listening for display configuration changes");
        Ok(Self {
            hwnd: Mutex::new(Some(HWND(hwnd_raw as *mut std::ffi::c_void))),
            join: Mutex::new(Some(join)),
            _context: context,
        })
    }

    fn stop(&self) {
        let hwnd = self.hwnd.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(hwnd) = hwnd {
            unsafe {
                let _ = PostMessageW(hwnd, WM_QUIT_LISTENER, WPARAM(0), LPARAM(0));
            }
        }
        let join = self.join.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(join) = join {
            let _ = join.join();
        }
    }
}

impl Drop for DisplayChangeListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn listener_thread_main(context_ptr: usize, hwnd_tx: mpsc::Sender<CaptureResult<isize>>) {
    match create_listener_window(context_ptr) {
        Ok(hwnd) => {
            let _ = hwnd_tx.send(Ok(hwnd.0 as isize));
            run_message_loop();
            unsafe {
                let _ = DestroyWindow(hwnd);
            }
        }
        Err(e) => {
            let _ = hwnd_tx.send(Err(e));
        }
    }
}

fn create_listener_window(context_ptr: usize) -> CaptureResult<HWND> {
    let class_name_wide: Vec<u16> = CLASS_NAME
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect();

    let hinstance = unsafe { GetModuleHandleW(None) }
        .context("GetModuleHandleW failed")
        .map_err(CaptureError::Platform)?;

    let wc = WNDCLASSW {
        lpfnWndProc: Some(display_change_wnd_proc),
        hInstance: hinstance.into(),
        lpszClassName: windows::core::PCWSTR(class_name_wide.as_ptr()),
        ..Default::default()
    };

    // Fails harmlessly when a previous listener already registered it.
    unsafe {
        RegisterClassW(&wc);
    }

    unsafe {
        CreateWindowExW(
            Default::default(),
            windows::core::PCWSTR(class_name_wide.as_ptr()),
            windows::core::PCWSTR::null(),
            WS_OVERLAPPED,
            0,
            0,
            0,
            0,
            HWND_MESSAGE,
            None,
            hinstance,
            Some(context_ptr as *const std::ffi::c_void),
        )
    }
    .context("CreateWindowExW for display change listener failed")
    .map_err(CaptureError::Platform)
}

fn run_message_loop() {
    let mut msg = MSG::default();
    unsafe {
        while GetMessageW(&mut msg, HWND::default(), 0, 0).as_bool() {
            if msg.message == WM_QUIT_LISTENER {
                break;
            }
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }
}

unsafe extern "system" fn display_change_wnd_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_DISPLAYCHANGE => {
            let ptr = unsafe { GetWindowLongPtrW(hwnd, GWLP_USERDATA) };
            if ptr != 0 {
                let context = unsafe { &*(ptr as *const ListenerContext) };
                (context.on_change)();
            }
            LRESULT(0)
        }
        msg if msg == WM_CLOSE || msg == WM_QUIT_LISTENER => {
            unsafe { PostQuitMessage(0) };
            LRESULT(0)
        }
        WM_CREATE => {
            let create_struct = unsafe { &*(lparam.0 as *const CREATESTRUCTW) };
            unsafe {
                SetWindowLongPtrW(hwnd, GWLP_USERDATA, create_struct.lpCreateParams as isize);
            }
            unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
        }
        _ => unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) },
    }
}
