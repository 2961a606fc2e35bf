//! Helpers shared by the unit tests.

use core::future::Future;
use core::pin::pin;
use core::ptr;
use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

static NOOP_VTABLE: RawWakerVTable =
    RawWakerVTable::new(|_| RawWaker::new(ptr::null(), &NOOP_VTABLE), |_| {}, |_| {}, |_| {});

/// Poll `future` once. Fake boards complete every pause immediately, so the
/// engine never actually suspends under test.
pub fn block_on<F: Future>(future: F) -> F::Output {
    // SAFETY: every vtable entry ignores the data pointer
    let waker = unsafe { Waker::from_raw(RawWaker::new(ptr::null(), &NOOP_VTABLE)) };
    let mut cx = Context::from_waker(&waker);
    match pin!(future).poll(&mut cx) {
        Poll::Ready(output) => output,
        Poll::Pending => panic!("future suspended on a fake board"),
    }
}
