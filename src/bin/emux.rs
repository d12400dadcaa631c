// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! emux command-line frontend
//!
//! Populates the typed configuration from flags (optionally seeded from
//! a TOML file) and drives the machine lifecycle.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use emux::core::config::EmulatorConfig;
use emux::core::machine::{machine_list, Machine};

#[derive(Parser, Debug)]
#[command(name = "emux", version, about = "Multi-system cycle-driven emulator")]
struct Args {
    /// Machine to emulate (see --list-machines)
    #[arg(short, long)]
    machine: Option<String>,

    /// Cart / ROM / disc image
    #[arg(short, long)]
    cart: Option<PathBuf>,

    /// System BIOS image
    #[arg(long)]
    bios: Option<PathBuf>,

    /// Boot ROM overlay image (Game Boy)
    #[arg(long)]
    bootrom: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Audio frontend name
    #[arg(long)]
    audio: Option<String>,

    /// Video frontend name
    #[arg(long)]
    video: Option<String>,

    /// Input frontend name
    #[arg(long)]
    input: Option<String>,

    /// CD-ROM frontend name
    #[arg(long)]
    cdrom: Option<String>,

    /// Integer video upscaling factor
    #[arg(long)]
    scale: Option<u32>,

    /// Disable wall-clock pacing (run as fast as possible)
    #[arg(long)]
    no_pace: bool,

    /// List supported machines and exit
    #[arg(long)]
    list_machines: bool,
}

fn build_config(args: &Args) -> Result<EmulatorConfig, emux::EmulatorError> {
    let mut config = match &args.config {
        Some(path) => EmulatorConfig::load(path)?,
        None => EmulatorConfig::default(),
    };

    if let Some(machine) = &args.machine {
        config.machine = machine.clone();
    }
    if let Some(cart) = &args.cart {
        config.cart = Some(cart.clone());
    }
    if let Some(bios) = &args.bios {
        config.bios = Some(bios.clone());
    }
    if let Some(bootrom) = &args.bootrom {
        config.bootrom = Some(bootrom.clone());
    }
    if let Some(audio) = &args.audio {
        config.audio_frontend = audio.clone();
    }
    if let Some(video) = &args.video {
        config.video_frontend = video.clone();
    }
    if let Some(input) = &args.input {
        config.input_frontend = input.clone();
    }
    if let Some(cdrom) = &args.cdrom {
        config.cdrom_frontend = cdrom.clone();
    }
    if let Some(scale) = args.scale {
        config.video_scale = scale;
    }
    if args.no_pace {
        config.pace = false;
    }

    Ok(config)
}

fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse();

    if args.list_machines {
        println!("Supported machines:");
        for entry in machine_list() {
            println!("  {:8} {}", entry.name, entry.description);
        }
        return ExitCode::SUCCESS;
    }

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("emux: {e}");
            return ExitCode::FAILURE;
        }
    };

    if config.machine.is_empty() {
        eprintln!("emux: no machine selected (try --list-machines)");
        return ExitCode::FAILURE;
    }

    let machine = Machine::new(config);
    if let Err(e) = machine.init() {
        eprintln!("emux: {e}");
        machine.deinit();
        return ExitCode::FAILURE;
    }

    machine.reset();
    machine.run();
    machine.deinit();

    ExitCode::SUCCESS
}
