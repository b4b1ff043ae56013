// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use clap::{Arg, ArgAction, Command, arg, value_parser};

fn output_flags(cmd: Command) -> Command {
    cmd.arg(arg!(--json "Print JSON").action(ArgAction::SetTrue))
        .arg(arg!(--jsonl "Print JSON lines").action(ArgAction::SetTrue))
}

fn window_args(cmd: Command) -> Command {
    cmd.arg(arg!(--account <NAME> "Account name").required(true))
        .arg(
            arg!(--period <PERIOD> "intraday|daily|weekly|monthly|yearly")
                .required(false)
                .default_value("intraday"),
        )
        .arg(arg!(--basis <BASIS> "total|securities (default from config)").required(false))
        .arg(arg!(--start <TS> "Window start, RFC 3339 or YYYY-MM-DD").required(false))
        .arg(arg!(--end <TS> "Window end, RFC 3339 or YYYY-MM-DD").required(false))
}

pub fn build_cli() -> Command {
    Command::new("folioboard")
        .about("Brokerage account dashboard: balances, holdings, and return rates")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase log verbosity")
                .action(ArgAction::Count)
                .global(true),
        )
        .subcommand(Command::new("init").about("Create the database"))
        .subcommand(
            Command::new("account")
                .about("Manage linked brokerage accounts")
                .subcommand(
                    Command::new("add")
                        .arg(arg!(--name <NAME> "Display name").required(true))
                        .arg(arg!(--cano <CANO> "Account number (8 digits)").required(true))
                        .arg(
                            arg!(--"product-code" <CODE> "Account product code")
                                .required(false)
                                .default_value("01"),
                        )
                        .arg(arg!(--"type" <TYPE> "paper|live").required(true))
                        .arg(arg!(--"app-key" <KEY> "KIS app key").required(true))
                        .arg(arg!(--"app-secret" <SECRET> "KIS app secret").required(true))
                        .arg(arg!(--"hts-id" <ID> "HTS user id").required(false))
                        .arg(arg!(--inactive "Add without activating").action(ArgAction::SetTrue)),
                )
                .subcommand(output_flags(Command::new("list")))
                .subcommand(
                    Command::new("edit")
                        .arg(arg!(--name <NAME> "Account to edit").required(true))
                        .arg(arg!(--rename <NEW> "New display name").required(false))
                        .arg(arg!(--cano <CANO> "Account number").required(false))
                        .arg(arg!(--"product-code" <CODE> "Account product code").required(false))
                        .arg(arg!(--"type" <TYPE> "paper|live").required(false))
                        .arg(arg!(--"app-key" <KEY> "KIS app key").required(false))
                        .arg(arg!(--"app-secret" <SECRET> "KIS app secret").required(false))
                        .arg(arg!(--"hts-id" <ID> "HTS user id").required(false)),
                )
                .subcommand(Command::new("rm").arg(arg!(--name <NAME>).required(true)))
                .subcommand(Command::new("activate").arg(arg!(--name <NAME>).required(true)))
                .subcommand(Command::new("deactivate").arg(arg!(--name <NAME>).required(true)))
                .subcommand(
                    Command::new("token")
                        .about("Issue a fresh access token now")
                        .arg(arg!(--name <NAME>).required(true)),
                ),
        )
        .subcommand(
            Command::new("balance")
                .about("Fetch and inspect balances")
                .subcommand(output_flags(
                    Command::new("fetch")
                        .about("Fetch live balances for active accounts and store them")
                        .arg(arg!(--account <NAME> "Only this account").required(false)),
                ))
                .subcommand(output_flags(
                    Command::new("show")
                        .about("Latest stored balance with holdings")
                        .arg(arg!(--account <NAME>).required(true)),
                ))
                .subcommand(
                    Command::new("watch")
                        .about("Fetch and store balances for active accounts on an interval")
                        .arg(
                            arg!(--interval <SECS> "Seconds between cycles")
                                .required(false)
                                .value_parser(value_parser!(u64))
                                .default_value("60"),
                        )
                        .arg(
                            arg!(--cycles <N> "Stop after N cycles")
                                .required(false)
                                .value_parser(value_parser!(u64)),
                        ),
                ),
        )
        .subcommand(
            Command::new("trades")
                .about("Daily orders and executions")
                .subcommand(
                    Command::new("sync")
                        .about("Fetch executions from KIS and store them")
                        .arg(arg!(--account <NAME>).required(true))
                        .arg(arg!(--start <DATE> "YYYY-MM-DD (default 7 days ago, KST)").required(false))
                        .arg(arg!(--end <DATE> "YYYY-MM-DD (default today, KST)").required(false)),
                )
                .subcommand(output_flags(
                    Command::new("list")
                        .arg(arg!(--account <NAME>).required(true))
                        .arg(arg!(--start <DATE> "YYYY-MM-DD").required(false))
                        .arg(arg!(--end <DATE> "YYYY-MM-DD").required(false))
                        .arg(arg!(--code <CODE> "Only this product code").required(false)),
                )),
        )
        .subcommand(output_flags(
            Command::new("summary")
                .about("Portfolio totals and per-account returns")
                .arg(arg!(--live "Fetch live balances first").action(ArgAction::SetTrue)),
        ))
        .subcommand(output_flags(window_args(
            Command::new("series").about("Return-rate series for a period"),
        )))
        .subcommand(
            Command::new("import")
                .about("Import data")
                .subcommand(
                    Command::new("snapshot")
                        .about("Store a raw KIS balance response read from a JSON file")
                        .arg(arg!(--account <NAME>).required(true))
                        .arg(arg!(--path <FILE>).required(true))
                        .arg(arg!(--at <TS> "Snapshot time (default now)").required(false)),
                ),
        )
        .subcommand(
            Command::new("export").about("Export data").subcommand(
                window_args(Command::new("series"))
                    .arg(arg!(--format <FMT> "csv|json").required(true))
                    .arg(arg!(--out <FILE>).required(true)),
            ),
        )
        .subcommand(
            Command::new("config")
                .about("Settings")
                .subcommand(Command::new("get").arg(arg!(--key <KEY>).required(true)))
                .subcommand(
                    Command::new("set")
                        .arg(arg!(--key <KEY>).required(true))
                        .arg(arg!(--value <VALUE>).required(true)),
                )
                .subcommand(Command::new("list")),
        )
        .subcommand(Command::new("doctor").about("Check tokens and snapshot coverage"))
}
