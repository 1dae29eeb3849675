//! Single-producer, single-consumer ring buffer shared between an interrupt
//! handler and a task. Either side can wait asynchronously for the other.

use core::{
    cell::{RefCell, UnsafeCell},
    future::{poll_fn, Future},
    mem::MaybeUninit,
    sync::atomic::{
        AtomicBool, AtomicUsize,
        Ordering::{Acquire, Relaxed, Release},
    },
    task::{
        Poll::{Pending, Ready},
        Waker,
    },
};

use critical_section::Mutex;

use crate::logging::{debug, trace};

type WakerSlot = Mutex<RefCell<Option<Waker>>>;

// Push at HEAD, pop at TAIL
pub struct Ringbuf<T, const N: usize> {
    is_split: AtomicBool,
    /// Called after every successful write, e.g. to pend the interrupt that drains the buffer
    on_write: Option<fn()>,
    head: AtomicUsize,
    tail: AtomicUsize,
    consumer_waker: WakerSlot,
    producer_waker: WakerSlot,
    buf: [UnsafeCell<MaybeUninit<T>>; N],
}

// SAFETY: slots are only touched by the single Producer (empty slots) or the
// single Consumer (full slots), ordered through the head/tail atomics.
unsafe impl<T: Send, const N: usize> Sync for Ringbuf<T, N> {}

impl<T, const N: usize> Default for Ringbuf<T, N> {
    fn default() -> Self {
        Self::new(None)
    }
}

fn wake(slot: &WakerSlot) -> bool {
    match critical_section::with(|cs| slot.borrow_ref_mut(cs).take()) {
        Some(waker) => {
            waker.wake();
            true
        }
        None => false,
    }
}

fn register(slot: &WakerSlot, waker: &Waker) {
    critical_section::with(|cs| *slot.borrow_ref_mut(cs) = Some(waker.clone()));
}

impl<T, const N: usize> Ringbuf<T, N> {
    pub const fn new(on_write: Option<fn()>) -> Self {
        Self {
            is_split: AtomicBool::new(false),
            on_write,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            consumer_waker: Mutex::new(RefCell::new(None)),
            producer_waker: Mutex::new(RefCell::new(None)),
            // SAFETY: an array of MaybeUninit needs no initialization
            #[allow(clippy::uninit_assumed_init)]
            buf: unsafe { MaybeUninit::uninit().assume_init() },
        }
    }

    /// ## Safety
    /// Must only be called once, as only one Producer and Consumer may
    /// exist per Ringbuf.
    pub unsafe fn split(&'static self) -> (Producer<T, N>, Consumer<T, N>) {
        self.is_split.store(true, Relaxed);
        (Producer(self), Consumer(self))
    }

    pub fn try_split(&'static self) -> Option<(Producer<T, N>, Consumer<T, N>)> {
        if self.is_split.fetch_or(true, Relaxed) {
            None
        } else {
            // SAFETY: checked above that no split happened before
            Some(unsafe { self.split() })
        }
    }

    fn len(&self) -> usize {
        self.head.load(Acquire).wrapping_sub(self.tail.load(Acquire))
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_full(&self) -> bool {
        self.len() == N
    }
}

pub struct Consumer<T: 'static, const N: usize>(&'static Ringbuf<T, N>);

impl<T: 'static, const N: usize> Consumer<T, N> {
    pub fn try_read(&self) -> Option<T> {
        if self.0.is_empty() {
            return None;
        }
        let tail = self.0.tail.load(Relaxed);
        // SAFETY: the slot is full and only this Consumer empties slots
        let val = unsafe { self.0.buf[tail % N].get().read().assume_init() };
        self.0.tail.store(tail.wrapping_add(1), Release);

        if wake(&self.0.producer_waker) {
            debug!("rb: woke producer");
        }
        Some(val)
    }

    pub fn async_read(&self) -> impl Future<Output = T> + '_ {
        poll_fn(|ctx| match self.try_read() {
            Some(val) => Ready(val),
            None => {
                register(&self.0.consumer_waker, ctx.waker());
                // a write may have landed before the waker was stored
                match self.try_read() {
                    Some(val) => Ready(val),
                    None => Pending,
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_full(&self) -> bool {
        self.0.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub struct Producer<T: 'static, const N: usize>(&'static Ringbuf<T, N>);

impl<T: 'static, const N: usize> Producer<T, N> {
    pub fn try_write(&self, val: T) -> Result<(), T> {
        if self.0.is_full() {
            trace!("rb: full");
            return Err(val);
        }
        let head = self.0.head.load(Relaxed);
        // SAFETY: the slot is empty and only this Producer fills slots
        unsafe {
            (*self.0.buf[head % N].get()).write(val);
        }
        self.0.head.store(head.wrapping_add(1), Release);

        if wake(&self.0.consumer_waker) {
            debug!("rb: woke consumer");
        }
        if let Some(on_write) = self.0.on_write {
            on_write();
        }
        Ok(())
    }

    /// Writes `leftover` and then items from `iter` until the buffer fills.
    /// Returns the item that did not fit, if any, and how many items were
    /// taken from `iter`.
    pub fn try_write_iter(
        &self,
        iter: &mut impl Iterator<Item = T>,
        leftover: Option<T>,
    ) -> (Result<(), T>, usize) {
        if let Some(val) = leftover {
            if let Err(val) = self.try_write(val) {
                return (Err(val), 0);
            }
        }
        let mut count = 0_usize; // can't enumerate cause we don't own the iterator
        for val in iter {
            count += 1;
            if let Err(val) = self.try_write(val) {
                return (Err(val), count);
            }
        }
        (Ok(()), count)
    }

    pub fn async_write(&self, val: T) -> impl Future<Output = ()> + '_ {
        let mut pending = Some(val);
        poll_fn(move |ctx| {
            let Some(val) = pending.take() else {
                return Ready(());
            };
            match self.try_write(val) {
                Ok(()) => Ready(()),
                Err(val) => {
                    register(&self.0.producer_waker, ctx.waker());
                    match self.try_write(val) {
                        Ok(()) => Ready(()),
                        Err(val) => {
                            pending = Some(val);
                            Pending
                        }
                    }
                }
            }
        })
    }

    /// Writes every item of `iter`, waiting for room as needed. Resolves to the
    /// number of items written.
    pub fn async_write_iter<'a>(
        &'a self,
        mut iter: impl Iterator<Item = T> + 'a,
    ) -> impl Future<Output = usize> + 'a {
        let mut leftover = None;
        let mut count = 0;
        poll_fn(
            move |ctx| match self.try_write_iter(&mut iter, leftover.take()) {
                (Err(val), newcount) => {
                    register(&self.0.producer_waker, ctx.waker());
                    leftover = Some(val);
                    count += newcount;
                    Pending
                }
                (Ok(()), newcount) => Ready(count + newcount),
            },
        )
    }

    pub fn is_full(&self) -> bool {
        self.0.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
