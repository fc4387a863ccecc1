//! Drives benchmark campaigns against a BFT-CRDT fleet. A campaign deploys the servers, runs the
//! benchmark client and tears everything down again for every combination of two swept workload
//! parameters.

use multibench::{cli, sweep::CampaignError};

fn run() -> Result<(), failure::Error> {
    let matches = clap::App::new("multibench")
        .about(
            "Drives benchmark campaigns against a BFT-CRDT fleet. Which routine is chosen by \
             passing different command line arguments.",
        )
        .subcommand(cli::sweep::cli_options())
        .subcommand(cli::teardown::cli_options())
        .setting(clap::AppSettings::SubcommandRequiredElseHelp)
        .setting(clap::AppSettings::DisableVersion)
        .get_matches();

    match matches.subcommand() {
        ("sweep", Some(sub_m)) => cli::sweep::run(sub_m),
        ("teardown", Some(sub_m)) => cli::teardown::run(sub_m),

        _ => {
            unreachable!();
        }
    }
}

fn main() {
    use console::style;

    env_logger::init();

    // Always get backtraces. The cost does not matter next to the length of a campaign.
    std::env::set_var("RUST_BACKTRACE", "1");

    // If an error occurred, try to print something helpful.
    if let Err(err) = run() {
        const MESSAGE: &str = r#"== multibench failed ======================================================================
The progress lines above show how far the campaign got. Run with RUST_LOG=debug to see every
remote command and trial state change.
The fleet may still be running servers: `multibench teardown --username <user>` stops every host
listed in the inventory file and clears it.
"#;

        println!("{}", style(MESSAGE).red().bold());

        if err.downcast_ref::<spurs::SshError>().is_some() {
            println!(
                "A remote command failed. Check that every host accepts `ssh <user>@<host>` with \
                 the default key."
            );
        }

        if let Some(err) = err.downcast_ref::<CampaignError>() {
            match err {
                CampaignError::RetriesExhausted { point, .. } => println!(
                    "The campaign was abandoned at {}. Its result log is incomplete.",
                    point
                ),
            }
        }

        println!("Cause: {}", err.as_fail());
        for cause in err.iter_causes() {
            println!("  caused by: {}", cause);
        }
        println!("{}", err.backtrace());

        std::process::exit(101);
    }
}
