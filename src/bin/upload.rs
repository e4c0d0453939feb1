use std::env;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Arg, ArgAction, Command};
use error_chain::bail;
use graincount::errors::{Error, Result, ResultExt};
use graincount::naming;
use lazy_static::lazy_static;
use serde_json::json;

lazy_static! {

    static ref API_URL: String = {
        dotenv::dotenv().ok();
        env::var("GRAINCOUNT_API_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_owned())
    };

    static ref API_TOKEN: Option<String> = {
        dotenv::dotenv().ok();
        env::var("GRAINCOUNT_API_TOKEN").ok()
    };
}

fn bearer() -> Result<String> {
    match *API_TOKEN {
        Some(ref token) => Ok(format!("Bearer {}", token)),
        None => bail!("GRAINCOUNT_API_TOKEN must be set. Get one with the login command."),
    }
}

fn prompt_password() -> Option<String> {
    println!("Enter the password:");
    match rpassword::read_password() {
        Err(_) => {
            println!("Error: couldn't read the password from keyboard.");
            None
        }
        Ok(pw) => Some(pw),
    }
}

fn read_reply(outcome: std::result::Result<ureq::Response, ureq::Error>)
              -> Result<serde_json::Value> {
    match outcome {
        Ok(resp) => resp.into_json().chain_err(|| "The server reply isn't valid JSON"),
        Err(ureq::Error::Status(code, resp)) => {
            let detail = resp.into_string().unwrap_or_default();
            bail!("HTTP {}: {}", code, detail)
        }
        Err(e) => Err(Error::with_chain(e, "Couldn't reach the server")),
    }
}

fn login(username: &str) -> Result<()> {
    let password = match prompt_password() {
        Some(pw) => pw,
        None => bail!("Couldn't read the password."),
    };
    let reply = read_reply(ureq::post(&format!("{}/get-token", *API_URL))
        .send_form(&[("username", username), ("password", &password)]))?;
    println!("export GRAINCOUNT_API_TOKEN={}",
             reply["access"].as_str().unwrap_or_default());
    println!("export GRAINCOUNT_API_REFRESH={}",
             reply["refresh"].as_str().unwrap_or_default());
    Ok(())
}

fn new_project(name: &str, description: Option<&str>, priority: Option<i32>, closed: bool)
               -> Result<()> {
    let mut body = json!({
        "project_name": name,
        "closed": closed,
    });
    if let Some(description) = description {
        body["project_description"] = json!(description);
    }
    if let Some(priority) = priority {
        body["priority"] = json!(priority);
    }
    let reply = read_reply(ureq::post(&format!("{}/project/", *API_URL))
        .set("Authorization", &bearer()?)
        .send_json(body))?;
    println!("Created project {} (id {}).", name, reply["id"]);
    Ok(())
}

fn new_sample(name: &str,
              project: i32,
              property: Option<&str>,
              total_grains: Option<i32>,
              priority: Option<i32>,
              min_contributors: Option<i32>,
              public: bool)
              -> Result<()> {
    let mut body = json!({
        "sample_name": name,
        "project": project,
        "public": public,
    });
    if let Some(property) = property {
        body["sample_property"] = json!(property);
    }
    if let Some(total_grains) = total_grains {
        body["total_grains"] = json!(total_grains);
    }
    if let Some(priority) = priority {
        body["priority"] = json!(priority);
    }
    if let Some(min_contributors) = min_contributors {
        body["min_contributor_num"] = json!(min_contributors);
    }
    let reply = read_reply(ureq::post(&format!("{}/sample/", *API_URL))
        .set("Authorization", &bearer()?)
        .send_json(body))?;
    println!("Created sample {} (id {}).", name, reply["id"]);
    Ok(())
}

/// Trailing digits of a grain directory name, like Grain01 or grain-12.
fn dir_index(name: &str) -> Option<i32> {
    let tail: String = name.chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let digits: String = tail.chars().rev().collect();
    digits.parse().ok()
}

fn fresh_boundary() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("graincount{:032x}", nanos)
}

fn multipart_body(boundary: &str, index: Option<i32>, files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(index) = index {
        body.extend_from_slice(format!(
            "--{}\r\nContent-Disposition: form-data; name=\"index\"\r\n\r\n{}\r\n",
            boundary, index,
        ).as_bytes());
    }
    for (name, data) in files {
        body.extend_from_slice(format!(
            "--{}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            boundary, name,
        ).as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    body
}

fn upload_grain(sample_id: i32, dir: &Path) -> Result<()> {
    let dir_name = dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let index = dir_index(&dir_name);

    let mut files = Vec::new();
    let entries = fs::read_dir(dir).chain_err(|| format!("Couldn't read {:?}", dir))?;
    for entry in entries {
        let entry = entry.chain_err(|| "Couldn't read a directory entry")?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        match naming::parse_upload_name(&name) {
            Ok(_) => {
                let data = fs::read(entry.path())
                    .chain_err(|| format!("Couldn't read {:?}", entry.path()))?;
                files.push((name, data));
            }
            Err(_) => println!("Skipping {} (not an uploadable file).", name),
        }
    }
    if files.is_empty() {
        bail!("{:?} contains no uploadable files.", dir);
    }

    let boundary = fresh_boundary();
    let body = multipart_body(&boundary, index, &files);
    let reply = read_reply(ureq::post(&format!("{}/sample/{}/grain/", *API_URL, sample_id))
        .set("Authorization", &bearer()?)
        .set("Content-Type", &format!("multipart/form-data; boundary={}", boundary))
        .send_bytes(&body))?;
    println!("Uploaded grain {} ({} files).", reply["index"], files.len());
    Ok(())
}

fn upload_count(grain: &str, ft_type: &str, points_file: &Path, worker: Option<&str>)
                -> Result<()> {
    let text = fs::read_to_string(points_file)
        .chain_err(|| format!("Couldn't read {:?}", points_file))?;
    let grainpoints: serde_json::Value = serde_json::from_str(&text)
        .chain_err(|| "The points file isn't valid JSON")?;
    let count = match grainpoints.as_array() {
        Some(points) => points.len(),
        None => bail!("The points file must hold a JSON array of points."),
    };

    let grain_value = match grain.parse::<i32>() {
        Ok(id) => json!(id),
        Err(_) => json!(grain),
    };
    let mut body = json!({
        "grain": grain_value,
        "ft_type": ft_type,
        "grainpoints": grainpoints,
    });
    if let Some(worker) = worker {
        body["worker"] = json!(worker);
    }
    let reply = read_reply(ureq::post(&format!("{}/count/", *API_URL))
        .set("Authorization", &bearer()?)
        .send_json(body))?;
    println!("Saved count {} with {} points.", reply["id"], count);
    Ok(())
}

fn int_arg(args: &clap::ArgMatches, name: &str) -> Result<Option<i32>> {
    match args.get_one::<String>(name) {
        None => Ok(None),
        Some(text) => match text.parse() {
            Ok(n) => Ok(Some(n)),
            Err(_) => bail!("{} must be a number, not {:?}", name, text),
        },
    }
}

fn main() {
    let matches = Command::new("graincount uploader")
        .subcommand_required(true)
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand(Command::new("login")
            .about("Get an API token pair")
            .arg(Arg::new("username").required(true)))
        .subcommand(Command::new("new-project")
            .about("Create a project")
            .arg(Arg::new("name").required(true))
            .arg(Arg::new("description").long("description").value_name("TEXT"))
            .arg(Arg::new("priority").long("priority").value_name("N"))
            .arg(Arg::new("closed").long("closed").action(ArgAction::SetTrue)))
        .subcommand(Command::new("new-sample")
            .about("Create a sample in a project")
            .arg(Arg::new("name").required(true))
            .arg(Arg::new("project").long("project").value_name("ID").required(true))
            .arg(Arg::new("property").long("property").value_name("T|A|D"))
            .arg(Arg::new("total-grains").long("total-grains").value_name("N")
                .help("Grain slots workers must count; grain uploads raise it as they land"))
            .arg(Arg::new("priority").long("priority").value_name("N"))
            .arg(Arg::new("min-contributors").long("min-contributors").value_name("N"))
            .arg(Arg::new("public").long("public").action(ArgAction::SetTrue)))
        .subcommand(Command::new("upload-grain")
            .about("Upload a grain directory: stack images, metadata and rois.json")
            .arg(Arg::new("sample").required(true).value_name("SAMPLE_ID"))
            .arg(Arg::new("dir").required(true).value_name("DIR")))
        .subcommand(Command::new("upload-count")
            .about("Upload a finished count from a JSON points file")
            .arg(Arg::new("grain").required(true).value_name("SAMPLE/INDEX"))
            .arg(Arg::new("ft-type").long("ft-type").value_name("S|I").required(true))
            .arg(Arg::new("points").long("points").value_name("FILE").required(true))
            .arg(Arg::new("worker").long("worker").value_name("USERNAME")))
        .get_matches();

    let outcome = match matches.subcommand() {
        Some(("login", args)) => {
            login(args.get_one::<String>("username").unwrap())
        }
        Some(("new-project", args)) => {
            match int_arg(args, "priority") {
                Ok(priority) => new_project(
                    args.get_one::<String>("name").unwrap(),
                    args.get_one::<String>("description").map(String::as_str),
                    priority,
                    args.get_flag("closed"),
                ),
                Err(e) => Err(e),
            }
        }
        Some(("new-sample", args)) => {
            match (int_arg(args, "project"),
                   int_arg(args, "total-grains"),
                   int_arg(args, "priority"),
                   int_arg(args, "min-contributors")) {
                (Ok(Some(project)), Ok(total_grains), Ok(priority), Ok(min_contributors)) => {
                    new_sample(
                        args.get_one::<String>("name").unwrap(),
                        project,
                        args.get_one::<String>("property").map(String::as_str),
                        total_grains,
                        priority,
                        min_contributors,
                        args.get_flag("public"),
                    )
                }
                (Err(e), ..) | (_, Err(e), ..) | (_, _, Err(e), _) | (.., Err(e)) => Err(e),
                (Ok(None), ..) => unreachable!(), // clap enforces --project
            }
        }
        Some(("upload-grain", args)) => {
            match int_arg(args, "sample") {
                Ok(Some(sample_id)) => upload_grain(
                    sample_id,
                    Path::new(args.get_one::<String>("dir").unwrap()),
                ),
                Ok(None) => unreachable!(), // clap enforces the positional
                Err(e) => Err(e),
            }
        }
        Some(("upload-count", args)) => {
            upload_count(
                args.get_one::<String>("grain").unwrap(),
                args.get_one::<String>("ft-type").unwrap(),
                Path::new(args.get_one::<String>("points").unwrap()),
                args.get_one::<String>("worker").map(String::as_str),
            )
        }
        _ => unreachable!(), // clap should exit before reaching here
    };

    if let Err(e) = outcome {
        println!("Error: {}", e);
        for err in e.iter().skip(1) {
            println!("Caused by: {}", err);
        }
        std::process::exit(1);
    }
}
