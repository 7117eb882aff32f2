//! Console capability detection, for picking a progress display.

/// A `TERM=dumb` terminal gets plain lines even when stdout is a tty.
fn term_is_dumb() -> bool {
    std::env::var_os("TERM").map_or(false, |term| term == "dumb")
}

/// Terminals narrower than this report no width at all.
const MIN_COLS: usize = 10;

#[cfg(unix)]
mod sys {
    pub fn stdout_is_console() -> bool {
        // Safety: isatty only inspects the descriptor.
        unsafe { libc::isatty(libc::STDOUT_FILENO) == 1 }
    }

    pub fn cols() -> Option<usize> {
        // Safety: TIOCGWINSZ fills in the zeroed struct or fails.
        unsafe {
            let mut winsize = std::mem::zeroed::<libc::winsize>();
            if libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut winsize) < 0 {
                return None;
            }
            Some(winsize.ws_col as usize)
        }
    }
}

#[cfg(windows)]
mod sys {
    use windows_sys::Win32::{Foundation::*, System::Console::*};

    pub fn stdout_is_console() -> bool {
        // Safety: console API calls on our own stdout handle.
        unsafe {
            let handle = GetStdHandle(STD_OUTPUT_HANDLE);
            let mut mode = 0;
            // GetConsoleMode itself fails when not attached to a console.
            if GetConsoleMode(handle, &mut mode) == 0 {
                return false;
            }
            // Overprinting needs escape sequence processing; failures here
            // only make the display uglier.
            _ = SetConsoleMode(handle, mode | ENABLE_VIRTUAL_TERMINAL_PROCESSING);
            true
        }
    }

    pub fn cols() -> Option<usize> {
        // Safety: console API calls on our own stdout handle.
        unsafe {
            let console = GetStdHandle(STD_OUTPUT_HANDLE);
            if console == INVALID_HANDLE_VALUE {
                return None;
            }
            let mut csbi = std::mem::zeroed::<CONSOLE_SCREEN_BUFFER_INFO>();
            if GetConsoleScreenBufferInfo(console, &mut csbi) == 0 {
                return None;
            }
            Some(csbi.dwSize.X as usize)
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod sys {
    pub fn stdout_is_console() -> bool {
        false
    }

    pub fn cols() -> Option<usize> {
        None
    }
}

/// Whether stdout can take an overprinted status display.
pub fn use_fancy() -> bool {
    !term_is_dumb() && sys::stdout_is_console()
}

/// Width of the console, if known and usable.
pub fn get_cols() -> Option<usize> {
    sys::cols().filter(|&cols| cols >= MIN_COLS)
}
