use colored::*;
use log::debug;

use geobus_lib::{Proxy, Value};

/// Parsed REPL input line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Quit,
    Inspect,
    Describe {
        interface: String,
    },
    Call {
        interface: String,
        method: String,
        args: Vec<Value>,
    },
    Get {
        interface: String,
        property: String,
    },
    Set {
        interface: String,
        property: String,
        value: Value,
    },
    GetAll {
        interface: String,
    },
    Subscribe {
        interface: String,
        signal: String,
    },
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let words: Vec<&str> = line.split_whitespace().collect();

        let Some((command, args)) = words.split_first() else {
            return Err("Empty input. Type 'help' to get list of commands".into());
        };

        let arity = |count: usize| {
            if args.len() == count {
                Ok(())
            } else {
                Err(format!(
                    "Invalid number of '{command}' arguments given. Use 'help' to see command syntax"
                ))
            }
        };

        match *command {
            "help" => Ok(Self::Help),
            "q" => Ok(Self::Quit),
            "inspect" => arity(0).map(|_| Self::Inspect),
            "describe" => arity(1).map(|_| Self::Describe {
                interface: args[0].into(),
            }),
            "call" => {
                if args.len() < 2 {
                    return Err(
                        "'call' needs an interface and a method name. Use 'help' to see command syntax".into(),
                    );
                }

                Ok(Self::Call {
                    interface: args[0].into(),
                    method: args[1].into(),
                    args: parse_values(&args[2..])?,
                })
            }
            "get" => arity(2).map(|_| Self::Get {
                interface: args[0].into(),
                property: args[1].into(),
            }),
            "set" => {
                arity(3)?;

                Ok(Self::Set {
                    interface: args[0].into(),
                    property: args[1].into(),
                    value: parse_value(args[2])?,
                })
            }
            "getall" => arity(1).map(|_| Self::GetAll {
                interface: args[0].into(),
            }),
            "subscribe" => arity(2).map(|_| Self::Subscribe {
                interface: args[0].into(),
                signal: args[1].into(),
            }),
            other => Err(format!(
                "Unknown command '{other}'. Type 'help' to get list of commands"
            )),
        }
    }
}

fn parse_value(input: &str) -> Result<Value, String> {
    Value::parse_typed(input).map_err(|e| format!("Failed to parse argument: {}", e.message()))
}

fn parse_values(inputs: &[&str]) -> Result<Vec<Value>, String> {
    inputs.iter().map(|input| parse_value(input)).collect()
}

pub fn print_help() {
    println!(
        "\t{} Introspect the remote object",
        "inspect".bright_blue()
    );
    println!(
        "\t{} {{interface}} Print known interface description",
        "describe".bright_blue()
    );
    println!(
        "\t{} {{interface}} {{method}} [{{argument}}...] Call a method. Arguments are typed",
        "call".bright_yellow()
    );
    println!("\t\tas 'SIGNATURE:VALUE', e.g. 'u:100' or 's:w00t'");
    println!(
        "\t{} {{interface}} {{property}} Read a property",
        "get".bright_yellow()
    );
    println!(
        "\t{} {{interface}} {{property}} {{argument}} Write a property",
        "set".bright_yellow()
    );
    println!(
        "\t{} {{interface}} Read all properties",
        "getall".bright_yellow()
    );
    println!(
        "\t{} {{interface}} {{signal}} Subscribe on the signal",
        "subscribe".bright_yellow()
    );
    println!("\t{} Quit", "q".bright_blue());
}

fn format_response(endpoint_type: &str, endpoint_name: &str, response: impl std::fmt::Display) {
    println!(
        "{} {} '{}' response: {}",
        ">".bright_blue(),
        endpoint_type,
        endpoint_name,
        response
    );
}

fn format_values(values: &[Value]) -> String {
    let values: Vec<String> = values.iter().map(Value::to_string).collect();
    format!("({})", values.join(", "))
}

/// Execute a command against the target object. Returns `true` to quit
pub async fn execute(proxy: &Proxy, command: Command) -> bool {
    debug!("Executing {command:?}");

    match command {
        Command::Help => print_help(),
        Command::Quit => return true,
        Command::Inspect => match proxy.introspect().await {
            Ok(xml) => println!("{xml}"),
            Err(err) => eprintln!("Failed to inspect '{}': {err}", proxy.path()),
        },
        Command::Describe { interface } => {
            match proxy.connection().schema().await.require(&interface) {
                Ok(description) => print!("{description}"),
                Err(err) => eprintln!("{err}"),
            }
        }
        Command::Call {
            interface,
            method,
            args,
        } => match proxy.call(&interface, &method, args).await {
            Ok(reply) => format_response("Method", &method, format_values(&reply)),
            Err(err) => eprintln!("Failed to make a call: {err}"),
        },
        Command::Get {
            interface,
            property,
        } => match proxy.get_property(&interface, &property).await {
            Ok(value) => format_response("Property", &property, value),
            Err(err) => eprintln!("Failed to get property: {err}"),
        },
        Command::Set {
            interface,
            property,
            value,
        } => match proxy.set_property(&interface, &property, value).await {
            Ok(_) => format_response("Property", &property, "ok"),
            Err(err) => eprintln!("Failed to set property: {err}"),
        },
        Command::GetAll { interface } => match proxy.get_all_properties(&interface).await {
            Ok(properties) => format_response("Properties", &interface, Value::from(properties)),
            Err(err) => eprintln!("Failed to get properties: {err}"),
        },
        Command::Subscribe { interface, signal } => {
            let signal_name = signal.clone();
            let result = proxy
                .subscribe(&interface, &signal, move |message| {
                    format_response("Signal", &signal_name, format_values(&message.args));
                    async { Ok(()) }
                })
                .await;

            match result {
                Ok(token) => println!("Subscribed to '{signal}' with token {token}"),
                Err(err) => eprintln!("Failed to subscribe to the signal '{signal}': {err}"),
            }
        }
    }

    false
}
