use crate::e2e::*;

#[test]
fn empty_tree() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.package("", "")?;
    let out = space.run_expect(&mut arbor_command(vec![]))?;
    assert_eq!(std::str::from_utf8(&out.stdout)?, "arbor: no work to do\n");
    Ok(())
}

#[test]
fn missing_root_package() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.run_fail(&mut arbor_command(vec![]))?;
    assert_output_contains(&out, "arbor: error: read src/Arborfile");
    Ok(())
}

#[test]
fn parse_errors_name_the_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.package("", "contain lib\n")?;
    space.package("lib", "# lib\nstatic-lib a b : a.c\n")?;
    let out = space.run_fail(&mut arbor_command(vec![]))?;
    assert_output_contains(
        &out,
        "arbor: error: src/lib/Arborfile:2: static-lib takes exactly one name",
    );
    Ok(())
}

#[cfg(unix)]
#[test]
fn builds_libraries_and_executables() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.package("", &root_arborfile("contain lib app\n"))?;
    space.package("lib", "static-lib str : str.h str.c\n")?;
    space.write("src/lib/str.h", "")?;
    space.write("src/lib/str.c", "echo str\n")?;
    space.package(
        "app",
        "dist-exe app : main.c\n\
         depend app : lib/str\n\
         dist-script hello\n\
         priv-data table\n",
    )?;
    space.write("src/app/main.c", "echo main\n")?;
    space.write("src/app/hello", "#!/bin/sh\necho hello\n")?;
    space.write("src/app/table", "1 2 3\n")?;

    let out = space.run_expect(&mut arbor_command(vec![]))?;
    assert_output_contains(&out, "archive lib/str");
    assert_output_contains(&out, "link app/app");
    assert_output_contains(&out, "arbor: ran 4 tasks, now up to date");

    assert!(space.exists("obj/lib/str.c.o"));
    assert!(space.exists("obj/lib/libstr.a"));
    assert_eq!(space.read("priv/app/table")?, b"1 2 3\n");

    let app = std::process::Command::new(space.path("dist/bin/app")).output()?;
    assert_eq!(std::str::from_utf8(&app.stdout)?, "main\nstr\n");
    let hello = std::process::Command::new(space.path("dist/bin/hello")).output()?;
    assert_eq!(std::str::from_utf8(&hello.stdout)?, "hello\n");
    Ok(())
}

#[cfg(unix)]
#[test]
fn verbose_prints_command_lines() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.package("", &root_arborfile("static-lib a : a.c\n"))?;
    space.write("src/a.c", "")?;
    let out = space.run_expect(&mut arbor_command(vec!["-v"]))?;
    assert_output_contains(&out, "cp src/a.c obj/a.c.o");
    Ok(())
}

#[test]
fn cycle_is_rejected_before_building() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.package(
        "",
        "static-lib a : a.c\n\
         static-lib b : b.c\n\
         depend a : b\n\
         depend b : a\n",
    )?;
    space.write("src/a.c", "")?;
    space.write("src/b.c", "")?;
    let out = space.run_fail(&mut arbor_command(vec![]))?;
    assert_output_contains(&out, "arbor: error: dependency cycle among nodes: ");
    assert!(!space.exists("obj"));
    Ok(())
}

#[test]
fn protected_package_is_hidden_from_outside() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.package("", "contain util app\n")?;
    space.package("util", "contain internal : protected\n")?;
    space.package("util/internal", "static-lib raw : raw.c\n")?;
    space.package(
        "app",
        "util-exe app : main.c\n\
         depend app : util/internal/raw\n",
    )?;
    space.write("src/util/internal/raw.c", "")?;
    space.write("src/app/main.c", "")?;
    let out = space.run_fail(&mut arbor_command(vec![]))?;
    assert_output_contains(&out, "arbor: error: app/app may not refer to util/internal/raw");
    Ok(())
}

#[test]
fn debug_tools() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.run(&mut arbor_command(vec!["-d", "list"]))?;
    assert_output_contains(&out, "explain");
    let out = space.run_fail(&mut arbor_command(vec!["-d", "frob"]))?;
    assert_output_contains(&out, "unknown -d \"frob\"");
    let out = space.run_fail(&mut arbor_command(vec!["-j", "0"]))?;
    assert_output_contains(&out, "arbor: error: invalid -j 0");
    Ok(())
}

#[cfg(unix)]
#[test]
fn trace_is_written() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.package("", &root_arborfile("static-lib a : a.c\n"))?;
    space.write("src/a.c", "")?;
    space.run_expect(&mut arbor_command(vec!["-d", "trace"]))?;
    let trace = String::from_utf8(space.read("trace.json")?)?;
    assert!(trace.contains("\"name\": \"archive a\""));
    Ok(())
}
