#![no_main]
#![no_std]

use defmt_brtt as _; // global logger
use panic_probe as _;

use defmt::{debug, error, info, trace, warn};
use gps_blesser::{
    blesser::{Blesser, Report},
    clock::SharedTickClock,
    config::Config,
    rb::{Consumer, Producer, Ringbuf},
    ticker::{HeadingCadence, PulseLevel, Ticker},
};
use rtic_monotonics::{
    create_systick_token,
    systick::{ExtU32, Systick},
};
use rtic_sync::{
    channel::{Receiver, Sender},
    make_channel,
};
use stm32_usbd::UsbBus;
use stm32l4xx_hal::{
    self as hal,
    gpio::{Alternate, Output, PushPull, PA2, PA3, PB0, PB1},
    hal::serial::{Read as _, Write as _},
    pac::{self, Interrupt, LPUART1, NVIC, TIM2},
    prelude::*,
    rcc::{ClockSecuritySystem, CrystalBypass},
    serial::{self, Serial},
    timer::{self, Timer},
};
use tinyvec::ArrayVec;
use usb_device::{
    device::{UsbDeviceBuilder, UsbVidPid},
    UsbError,
};
use usbd_serial::{SerialPort, USB_CLASS_CDC};

type LpUart1 = Serial<LPUART1, (PA2<Alternate<PushPull, 8>>, PA3<Alternate<PushPull, 8>>)>;

const UART_TX_BUFSIZE: usize = 256;
const UART_RX_BUFSIZE: usize = 256;
const REPORT_QUEUE: usize = 4;

/// Local time of day, advanced by the TIM2 interrupt and disciplined by the GPS task
static CLOCK: SharedTickClock = SharedTickClock::new();
static CADENCE: HeadingCadence = HeadingCadence::new();

defmt::timestamp!("{=i32}", CLOCK.read());

// same panicking *behavior* as `panic-probe` but doesn't print a panic message
// this prevents the panic message being printed *twice* when `defmt::panic` is invoked
#[defmt::panic_handler]
fn panic() -> ! {
    cortex_m::asm::udf()
}

fn pend_lpuart1() {
    NVIC::pend(Interrupt::LPUART1);
}

struct UartStuff {
    uart: LpUart1,
    rx_send: Producer<u8, UART_RX_BUFSIZE>,
    tx_recv: Consumer<u8, UART_TX_BUFSIZE>,
    /// Byte taken from `tx_recv` that the transmitter was not ready for
    tx_pending: Option<u8>,
}

struct Pulse {
    timer: Timer<TIM2>,
    ticker: Ticker,
    out: PB0<Output<PushPull>>,
    out_n: PB1<Output<PushPull>>,
}

#[rtic::app(
    device = stm32l4xx_hal::pac,
    dispatchers = [EXTI2, EXTI3],
)]
mod app {
    use super::*;

    #[shared]
    struct Shared {
        config: Config,
    }

    #[local]
    struct Local {
        uart: UartStuff,
        pulse: Pulse,
    }

    ////////////////////////////////////////////////////////////////////////////
    // Main thread tasks ///////////////////////////////////////////////////////
    ////////////////////////////////////////////////////////////////////////////

    #[init]
    fn init(cx: init::Context) -> (Shared, Local) {
        trace!("init enter");

        let mut flash = cx.device.FLASH.constrain();
        let mut rcc = cx.device.RCC.constrain();
        let mut pwr = cx.device.PWR.constrain(&mut rcc.apb1r1);
        let clocks = rcc
            .cfgr
            .lse(CrystalBypass::Disable, ClockSecuritySystem::Disable)
            .hsi48(true)
            .sysclk(48.MHz())
            .freeze(&mut flash.acr, &mut pwr);

        let mut gpioa = cx.device.GPIOA.split(&mut rcc.ahb2);
        let mut gpiob = cx.device.GPIOB.split(&mut rcc.ahb2);

        // SysTick paces the USB poll loop
        Systick::start(cx.core.SYST, clocks.sysclk().raw(), create_systick_token!());

        // GPS in, GPS echo + heading out
        let tx = gpioa
            .pa2
            .into_alternate(&mut gpioa.moder, &mut gpioa.otyper, &mut gpioa.afrl);
        let rx = gpioa
            .pa3
            .into_alternate(&mut gpioa.moder, &mut gpioa.otyper, &mut gpioa.afrl);
        let mut uart = Serial::lpuart1(
            cx.device.LPUART1,
            (tx, rx),
            serial::Config::default().baudrate(38_400.bps()),
            clocks,
            &mut rcc.apb1r2,
        );
        uart.listen(serial::Event::Rxne);

        static UART_RX: Ringbuf<u8, UART_RX_BUFSIZE> = Ringbuf::new(None);
        let (uart_rx_send, uart_rx_recv) = defmt::unwrap!(UART_RX.try_split());
        static UART_TX: Ringbuf<u8, UART_TX_BUFSIZE> = Ringbuf::new(Some(pend_lpuart1 as fn()));
        let (uart_tx_send, uart_tx_recv) = defmt::unwrap!(UART_TX.try_split());

        // Pulse outputs, complementary
        let out = gpiob
            .pb0
            .into_push_pull_output(&mut gpiob.moder, &mut gpiob.otyper);
        let out_n = gpiob
            .pb1
            .into_push_pull_output(&mut gpiob.moder, &mut gpiob.otyper);
        let mut tick_timer = Timer::tim2(cx.device.TIM2, 1.kHz(), clocks, &mut rcc.apb1r1);
        tick_timer.listen(timer::Event::TimeOut);

        // USB serial for diagnostics
        let dm = gpioa
            .pa11
            .into_alternate(&mut gpioa.moder, &mut gpioa.otyper, &mut gpioa.afrh);
        let dp = gpioa
            .pa12
            .into_alternate(&mut gpioa.moder, &mut gpioa.otyper, &mut gpioa.afrh);

        // Turn on USB power
        unsafe {
            pac::Peripherals::steal()
                .PWR
                .cr2
                .modify(|_, w| w.usv().set_bit())
        };

        let usb = hal::usb::Peripheral {
            usb: cx.device.USB,
            pin_dm: dm,
            pin_dp: dp,
        };

        let (report_send, report_recv) = make_channel!(Report, REPORT_QUEUE);

        // No settings store on this board, run on defaults
        let config = Config::default();
        info!("config: {}", config);

        defmt::unwrap!(usb_poll::spawn(usb, report_recv).map_err(|_| ()));
        defmt::unwrap!(gps_task::spawn(uart_tx_send, uart_rx_recv, report_send).map_err(|_| ()));

        info!("done initializing!");
        trace!("init exit");
        (
            Shared { config },
            Local {
                uart: UartStuff {
                    uart,
                    rx_send: uart_rx_send,
                    tx_recv: uart_tx_recv,
                    tx_pending: None,
                },
                pulse: Pulse {
                    timer: tick_timer,
                    ticker: Ticker::new(),
                    out,
                    out_n,
                },
            },
        )
    }

    #[idle]
    fn idle(_: idle::Context) -> ! {
        trace!("idle enter");

        loop {
            // Only sleep in release mode, since the debugger doesn't interact with sleep very nicely
            #[cfg(debug_assertions)]
            cortex_m::asm::nop();
            #[cfg(not(debug_assertions))]
            cortex_m::asm::wfi();
        }
    }

    ////////////////////////////////////////////////////////////////////////////
    // Hardware interrupt handlers /////////////////////////////////////////////
    ////////////////////////////////////////////////////////////////////////////

    // One tick of the local clock
    #[task(binds = TIM2, priority = 12, shared = [config], local = [pulse])]
    fn on_tick(mut cx: on_tick::Context) {
        let pulse = cx.local.pulse;
        pulse.timer.clear_interrupt(timer::Event::TimeOut);

        let settings = cx.shared.config.lock(|config| config.pulse());
        let level = critical_section::with(|cs| pulse.ticker.on_tick(cs, &CLOCK, &CADENCE, settings));
        match level {
            Some(PulseLevel::High) => {
                pulse.out.set_high();
                pulse.out_n.set_low();
            }
            Some(PulseLevel::Low) => {
                pulse.out.set_low();
                pulse.out_n.set_high();
            }
            None => {}
        }
    }

    // Transfer UART data to/from the buffers
    #[task(binds = LPUART1, priority = 10, local = [uart])]
    fn on_uart(cx: on_uart::Context) {
        let uart = cx.local.uart;
        loop {
            match uart.uart.read() {
                // If the recv buffer is full, then drop the received value
                Ok(b) => {
                    let _ = uart.rx_send.try_write(b);
                }
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => {
                    warn!("uart rx error: {}", defmt::Debug2Format(&e));
                    break;
                }
            }
        }

        while let Some(b) = uart.tx_pending.take().or_else(|| uart.tx_recv.try_read()) {
            match uart.uart.write(b) {
                Ok(()) => {}
                Err(nb::Error::WouldBlock) => {
                    uart.tx_pending = Some(b);
                    break;
                }
                Err(nb::Error::Other(_)) => error!("uart tx error"),
            }
        }
        if uart.tx_pending.is_some() {
            uart.uart.listen(serial::Event::Txe);
        } else {
            uart.uart.unlisten(serial::Event::Txe);
        }
    }

    ////////////////////////////////////////////////////////////////////////////
    // Async tasks /////////////////////////////////////////////////////////////
    ////////////////////////////////////////////////////////////////////////////

    // Echo GPS data, discipline the clock and interleave heading sentences
    #[task(priority = 2, shared = [config])]
    async fn gps_task(
        mut cx: gps_task::Context,
        uart_tx_send: Producer<u8, UART_TX_BUFSIZE>,
        uart_rx_recv: Consumer<u8, UART_RX_BUFSIZE>,
        mut reports: Sender<'static, Report, REPORT_QUEUE>,
    ) {
        trace!("gps_task enter");

        let mut blesser = Blesser::new(&CLOCK, &CADENCE);
        loop {
            let b = uart_rx_recv.async_read().await;

            // stamp a `$` before the echo can wait on a full TX buffer
            let config = cx.shared.config.lock(|config| *config);
            let step = blesser.handle_gps_byte(b, &config);

            uart_tx_send.async_write(b).await;

            if let Some(report) = step.report(&config) {
                if reports.try_send(report).is_err() {
                    debug!("report queue full");
                }
            }
            if let Some(heading) = step.heading {
                uart_tx_send
                    .async_write_iter(heading.as_bytes().iter().copied())
                    .await;
            }
        }
    }

    // Poll USB
    #[task(priority = 1)]
    async fn usb_poll(
        _cx: usb_poll::Context,
        usb: hal::usb::Peripheral,
        mut reports: Receiver<'static, Report, REPORT_QUEUE>,
    ) {
        trace!("usb_poll enter");

        let usb_bus = UsbBus::new(usb);

        let mut serial = SerialPort::new(&usb_bus);

        let mut usb_dev = UsbDeviceBuilder::new(&usb_bus, UsbVidPid(0x16c0, 0x27dd))
            .manufacturer("GPS Blesser")
            .product("GPS Blesser diagnostics")
            .serial_number("0001")
            .device_class(USB_CLASS_CDC)
            .build();

        let mut tx_buf = ArrayVec::<[u8; 64]>::new();

        loop {
            Systick::delay(10.millis()).await;

            while tx_buf.len() + Report::CAPACITY <= tx_buf.capacity() {
                match reports.try_recv() {
                    Ok(report) => tx_buf.extend_from_slice(report.as_bytes()),
                    Err(_) => break,
                }
            }

            if !usb_dev.poll(&mut [&mut serial]) {
                continue;
            }

            // Drain anything the host sends
            let mut rx = [0u8; 16];
            let _ = serial.read(&mut rx);

            if tx_buf.is_empty() {
                continue;
            }
            match serial.write(&tx_buf) {
                Ok(count) => {
                    trace!("sent {} bytes to usb", count);
                    tx_buf.drain(0..count).for_each(|_| ());
                }
                Err(UsbError::WouldBlock) => {}
                Err(_) => error!("usb error"),
            }
        }
    }
}
