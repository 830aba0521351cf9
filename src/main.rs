//! ISI capture pipeline on simulated hardware
//!
//! A tokio task plays the camera's frame clock; the consumer waits on the
//! buffer signal, drains the ready queue and hands every buffer straight back.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use flume::Receiver;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use isi_capture::sim::{SimulatedIsi, SimulatedSensor};
use isi_capture::{Config, FrameBuffer, Isi, SignalResult, SimulationConfig, Timeout};

type Driver = Isi<Arc<SimulatedIsi>, SimulatedSensor>;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("isi_capture=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("ISI capture launching...");

    // Load configuration
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref())?;

    let hw = Arc::new(SimulatedIsi::new());
    let sensor = SimulatedSensor::new(
        config.simulation.sensor_name.clone(),
        config.simulation.sensor_format(),
    );
    let isi: Arc<Driver> = Arc::new(Isi::new(
        hw.clone(),
        sensor,
        config.capture.isi_options(),
    ));

    let weak = Arc::downgrade(&isi);
    hw.attach_isr(move || {
        if let Some(isi) = weak.upgrade() {
            isi.handle_interrupt();
        }
    });

    let caps = isi.get_caps()?;
    let format = isi.set_format(&config.capture.output_format())?;
    info!(
        "output {} {}x{}, pitch {}, {} bytes per frame",
        format.pixelformat,
        format.width,
        format.height,
        format.pitch,
        format.frame_size()
    );

    // One extra buffer becomes the drop sentinel
    let count = config.capture.buffer_count.max(caps.min_buffer_count + 1);
    for _ in 0..count {
        isi.enqueue(FrameBuffer::new(format.frame_size()))?;
    }
    info!("allocated {} buffers", count);

    let (signal_tx, signal_rx) = flume::bounded(1);
    isi.set_signal(Some(signal_tx))?;
    isi.stream_start()?;

    // Frame clock standing in for the sensor
    let clock = {
        let hw = hw.clone();
        let period = config.simulation.frame_interval();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                hw.frame_done();
            }
        })
    };

    let mut consumer = {
        let isi = isi.clone();
        let simulation = config.simulation.clone();
        let timeout = config.capture.dequeue_timeout();
        tokio::spawn(consume(isi, signal_rx, simulation, timeout))
    };

    tokio::select! {
        result = &mut consumer => result??,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            consumer.abort();
        }
    }

    isi.stream_stop()?;
    clock.abort();
    let _ = clock.await;
    isi.set_signal(None)?;

    let stats = isi.stats();
    info!(
        completed = stats.frames_completed,
        dropped = stats.frames_dropped,
        starvations = stats.starvations,
        hardware_frames = hw.frames(),
        "capture finished"
    );

    let released = isi.teardown()?;
    info!("ISI capture shutting down, {} buffers released", released.len());
    Ok(())
}

async fn consume(
    isi: Arc<Driver>,
    signal: Receiver<SignalResult>,
    simulation: SimulationConfig,
    timeout: Duration,
) -> Result<()> {
    let started = Instant::now();
    let mut delivered = 0u64;
    let mut dropped = 0u64;

    while simulation.frames == 0 || delivered < simulation.frames {
        match tokio::time::timeout(timeout, signal.recv_async()).await {
            Ok(Ok(SignalResult::BufferDone)) => {}
            Ok(Ok(SignalResult::FrameDropped)) => dropped += 1,
            Ok(Err(_)) => return Err(eyre!("buffer signal disconnected")),
            Err(_) => warn!("no frame within {:?}", timeout),
        }

        // The signal only says something happened; drain what is ready
        while let Ok(buffer) = isi.dequeue(Timeout::NoWait) {
            delivered += 1;
            if delivered % 30 == 0 {
                let fps = delivered as f64 / started.elapsed().as_secs_f64();
                info!(
                    sequence = buffer.sequence,
                    timestamp = ?buffer.timestamp,
                    bytes = buffer.bytesused,
                    "{:.1} fps",
                    fps
                );
            }
            if simulation.consumer_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(simulation.consumer_delay_ms)).await;
            }
            isi.enqueue(buffer)?;
        }
    }

    info!(delivered, dropped, "consumer done");
    Ok(())
}
