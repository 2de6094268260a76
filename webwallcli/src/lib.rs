pub use crate::app::{describe, exit_code, Args, ConsoleProgress, WebwallCliApp};

mod app {
    use anyhow::Result;
    use clap::Parser;
    use log::{debug, info};
    use std::io::{self, Write};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use webwall_core::*;

    #[derive(Parser, Debug)]
    #[command(name = "webwallcli")]
    #[command(about = "Set the desktop background from an image URL or data URI")]
    #[command(version)]
    pub struct Args {
        /// Image reference: http(s) URL, file path or data URI
        pub url: String,

        /// Height of the display the square background is fitted to
        #[arg(long)]
        pub display_height: Option<u32>,

        /// Do not listen for Enter to cancel
        #[arg(long)]
        pub no_cancel_prompt: bool,

        /// Use this directory instead of the per-user config directory
        #[arg(long)]
        pub config_dir: Option<PathBuf>,
    }

    /// Prints the progress message and remembers whether it is still up.
    #[derive(Debug, Default)]
    pub struct ConsoleProgress {
        showing: AtomicBool,
    }

    impl ProgressSurface for ConsoleProgress {
        fn show(&self, message: &str) {
            self.showing.store(true, Ordering::SeqCst);
            println!("{}", message);
        }

        fn is_showing(&self) -> bool {
            self.showing.load(Ordering::SeqCst)
        }

        fn dismiss(&self) {
            self.showing.store(false, Ordering::SeqCst);
        }
    }

    pub struct WebwallCliApp {
        config: Config,
        args: Args,
    }

    impl WebwallCliApp {
        pub fn new(args: Args) -> Result<Self> {
            let mut config = match &args.config_dir {
                Some(dir) => Config::with_root(dir)?,
                None => Config::new()?,
            };
            if let Some(height) = args.display_height {
                config.settings.display_height = height;
            }
            debug!("Using config directory {}", config.config_dir.display());

            Ok(Self { config, args })
        }

        pub fn display_height(&self) -> u32 {
            self.config.settings.display_height
        }

        fn services(&self, progress: Arc<ConsoleProgress>) -> Services {
            let sink = Arc::new(DesktopWallpaper::from_config(&self.config));
            let display = Arc::new(FixedDisplay(self.display_height()));
            Services::new(sink, display).with_progress(progress)
        }

        /// Run the task to completion and report what happened.
        pub fn run(&self) -> Result<Outcome> {
            let progress = Arc::new(ConsoleProgress::default());
            let handler = Arc::new(WallpaperHandler::new(
                Some(self.args.url.clone()),
                self.services(progress.clone()),
            ));
            let height = self.display_height();
            info!("Fitting {} to a {}x{} background", self.args.url, height, height);

            handler.on_request();
            if !self.args.no_cancel_prompt && progress.is_showing() {
                print!("Press Enter to cancel... ");
                io::stdout().flush()?;
                spawn_cancel_listener(handler.clone());
            }

            let outcome = handler
                .join()
                .ok_or_else(|| anyhow::anyhow!("Wallpaper worker did not finish"))?;
            println!();
            println!("{}", describe(&outcome));
            Ok(outcome)
        }
    }

    /// Cancels the handler once a line arrives on stdin. The thread is left
    /// blocked on stdin if the run finishes first.
    fn spawn_cancel_listener(handler: Arc<WallpaperHandler>) {
        let spawned = thread::Builder::new()
            .name("cancel-prompt".to_string())
            .spawn(move || {
                let mut line = String::new();
                if io::stdin().read_line(&mut line).is_ok()
                    && handler.state() == HandlerState::Running
                {
                    println!("Cancelling...");
                    handler.on_cancel();
                }
            });
        if let Err(e) = spawned {
            eprintln!("Cancel prompt unavailable: {}", e);
        }
    }

    pub fn describe(outcome: &Outcome) -> String {
        match outcome {
            Outcome::Applied {
                width,
                height,
                sample_size,
            } => format!(
                "Set wallpaper: {}x{} (decoded at 1/{})",
                width, height, sample_size
            ),
            Outcome::Restored { width, height } => {
                format!("Restored previous wallpaper ({}x{})", width, height)
            }
            Outcome::RestoreFailed => "Could not restore the previous wallpaper".to_string(),
            Outcome::NotOpened => "Could not open the image".to_string(),
        }
    }

    /// Process exit status for a finished run.
    pub fn exit_code(outcome: &Outcome) -> i32 {
        match outcome {
            Outcome::Applied { .. } | Outcome::Restored { .. } => 0,
            Outcome::NotOpened => 2,
            Outcome::RestoreFailed => 3,
        }
    }
}
