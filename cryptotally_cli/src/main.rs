use clap::AppSettings;
use clap::{App, Arg, SubCommand};

mod command_simulate;

fn main() {
    env_logger::init();

    let app = App::new("CryptoTally")
        .version("0.1")
        .about("Privacy-preserving vote tallying - command-line tool")
        .setting(AppSettings::ArgRequiredElseHelp)
        .subcommand(
            SubCommand::with_name("simulate")
                .about("Run a full election in-process over the mock network")
                .setting(AppSettings::ArgRequiredElseHelp)
                .arg(
                    Arg::with_name("VOTES")
                        .index(1)
                        .required(true)
                        .help("Comma-separated binary votes, e.g. 0,0,1,1,1"),
                )
                .arg(
                    Arg::with_name("counters")
                        .long("counters")
                        .takes_value(true)
                        .default_value("3")
                        .help("Number of vote counters in the committee"),
                )
                .arg(
                    Arg::with_name("threshold")
                        .long("threshold")
                        .takes_value(true)
                        .default_value("3")
                        .help("Partial sums needed to reconstruct the tally"),
                )
                .arg(
                    Arg::with_name("unreliable")
                        .long("unreliable")
                        .help("Drop, delay, and duplicate messages"),
                ),
        );

    let matches = app.get_matches();

    if let Some(matches) = matches.subcommand_matches("simulate") {
        command_simulate::command_simulate(matches);
    }
}
