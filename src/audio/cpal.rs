// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{error::Error, fmt, sync::Arc, thread};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::{error, info, span, Level};

use super::buffer::{CHANNELS, SAMPLE_RATE};
use super::graph::Graph;
use crate::config;

/// A small wrapper around a cpal::Device. The device renders the shared output graph from its
/// stream callback, so the graph's clock is the hardware clock.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
    /// The graph rendered by the output stream.
    graph: Arc<Mutex<Graph>>,
    /// Dropping this sender shuts the output thread down.
    shutdown_tx: Option<crossbeam_channel::Sender<()>>,
    /// Handle to the thread that owns the cpal stream.
    output_thread: Option<thread::JoinHandle<()>>,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

/// f32 callback: render the graph directly into the cpal buffer.
fn create_f32_callback(
    graph: Arc<Mutex<Graph>>,
    channels: usize,
) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) + Send + 'static {
    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        graph.lock().render(data, channels);
    }
}

/// Integer callback: render the graph and convert.
fn create_converting_callback<T: cpal::Sample + cpal::FromSample<f32>>(
    graph: Arc<Mutex<Graph>>,
    channels: usize,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static {
    let mut scratch: Vec<f32> = Vec::new();
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        scratch.resize(data.len(), 0.0);
        graph.lock().render(&mut scratch, channels);
        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
            *dst = T::from_sample(src);
        }
    }
}

impl Device {
    /// Lists cpal output devices.
    pub fn list() -> Result<Vec<Device>, Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(output_configs) = device.supported_output_configs() else {
                    continue;
                };

                let max_channels = output_configs
                    .map(|output_config| output_config.channels())
                    .max()
                    .unwrap_or(0);

                if max_channels > 0 {
                    devices.push(Device {
                        name: device.name()?,
                        max_channels,
                        host_id,
                        device,
                        graph: Arc::new(Mutex::new(Graph::new(SAMPLE_RATE, CHANNELS))),
                        shutdown_tx: None,
                        output_thread: None,
                    })
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Gets the given cpal device and starts its output stream.
    pub fn get(config: &config::Audio) -> Result<Device, Box<dyn Error>> {
        let name = config.device();
        match Device::list()?
            .into_iter()
            .find(|device| device.name.trim() == name)
        {
            Some(mut device) => {
                device.start_output_thread()?;
                Ok(device)
            }
            None => Err(format!("no device found with name {}", name).into()),
        }
    }

    /// Starts the output thread that creates and owns the cpal stream. The stream lives until the
    /// device is dropped.
    fn start_output_thread(&mut self) -> Result<(), Box<dyn Error>> {
        let channels = self.max_channels.min(CHANNELS);
        let sample_format = self.device.default_output_config()?.sample_format();
        let graph = self.graph.clone();
        let device = self.device.clone();
        let name = self.name.clone();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);

        let output_thread = thread::spawn(move || {
            let span = span!(Level::INFO, "output stream (cpal)");
            let _enter = span.enter();

            let config = cpal::StreamConfig {
                channels,
                sample_rate: SAMPLE_RATE,
                buffer_size: cpal::BufferSize::Default,
            };
            let stream_channels = channels as usize;

            let stream_result = match sample_format {
                cpal::SampleFormat::F32 => device.build_output_stream(
                    &config,
                    create_f32_callback(graph, stream_channels),
                    |err| error!("CPAL output stream error: {}", err),
                    None,
                ),
                cpal::SampleFormat::I16 => device.build_output_stream(
                    &config,
                    create_converting_callback::<i16>(graph, stream_channels),
                    |err| error!("CPAL output stream error: {}", err),
                    None,
                ),
                cpal::SampleFormat::I32 => device.build_output_stream(
                    &config,
                    create_converting_callback::<i32>(graph, stream_channels),
                    |err| error!("CPAL output stream error: {}", err),
                    None,
                ),
                other => {
                    let _ = started_tx.send(Err(format!("unsupported sample format {:?}", other)));
                    return;
                }
            };

            let stream = match stream_result {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = started_tx.send(Err(format!("unable to create stream: {}", e)));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = started_tx.send(Err(format!("unable to start stream: {}", e)));
                return;
            }
            info!(device = name, "CPAL output stream started successfully");
            let _ = started_tx.send(Ok(()));

            // Keep the stream alive until the device goes away.
            let _ = shutdown_rx.recv();
            info!(device = name, "CPAL output stream stopped");
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.output_thread = Some(output_thread);
        // On failure the device is dropped by the caller, which joins the finished thread.
        wait_for_stream(&self.name, &started_rx)
    }
}

/// Waits for the output thread to report whether its stream is running.
fn wait_for_stream(
    name: &str,
    started_rx: &crossbeam_channel::Receiver<Result<(), String>>,
) -> Result<(), Box<dyn Error>> {
    match started_rx.recv() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(device = name, err = e, "Output stream failed.");
            Err(format!("output stream on {} failed: {}", name, e).into())
        }
        Err(_) => Err(format!("output thread for {} exited before starting", name).into()),
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the output thread.
        drop(self.shutdown_tx.take());
        if let Some(thread) = self.output_thread.take() {
            let _ = thread.join();
        }
    }
}

impl super::Context for Device {
    fn graph(&self) -> &Mutex<Graph> {
        &self.graph
    }
}

#[cfg(test)]
mod test {
    use super::wait_for_stream;

    #[test]
    fn test_stream_failure_is_reported() {
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        started_tx
            .send(Err("unable to create stream: rate not supported".to_string()))
            .expect("send");
        let err = wait_for_stream("speakers", &started_rx).expect_err("stream failed");
        assert!(err.to_string().contains("rate not supported"));
    }

    #[test]
    fn test_stream_thread_gone_is_reported() {
        let (started_tx, started_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        drop(started_tx);
        assert!(wait_for_stream("speakers", &started_rx).is_err());
    }

    #[test]
    fn test_stream_started() {
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        started_tx.send(Ok(())).expect("send");
        assert!(wait_for_stream("speakers", &started_rx).is_ok());
    }
}
