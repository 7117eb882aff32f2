//! Rebuilds after changes, and no rebuilds without them.

use crate::e2e::*;

#[cfg(unix)]
fn lib_and_app(space: &TestSpace) -> anyhow::Result<()> {
    space.package("", &root_arborfile("contain lib app\n"))?;
    space.package("lib", "static-lib str : str.c\n")?;
    space.write("src/lib/str.c", "echo str\n")?;
    space.package(
        "app",
        "dist-exe app : main.c\n\
         depend app : lib/str\n",
    )?;
    space.write("src/app/main.c", "echo main\n")?;
    Ok(())
}

#[cfg(unix)]
#[test]
fn second_run_does_nothing() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    lib_and_app(&space)?;
    let out = space.run_expect(&mut arbor_command(vec![]))?;
    assert_output_contains(&out, "arbor: ran 2 tasks, now up to date");
    let out = space.run_expect(&mut arbor_command(vec![]))?;
    assert_eq!(std::str::from_utf8(&out.stdout)?, "arbor: no work to do\n");
    Ok(())
}

#[cfg(unix)]
#[test]
fn change_propagates_to_dependents() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    lib_and_app(&space)?;
    space.run_expect(&mut arbor_command(vec![]))?;

    space.write("src/lib/str.c", "echo changed\n")?;
    let out = space.run_expect(&mut arbor_command(vec!["-d", "explain"]))?;
    assert_output_contains(&out, "explain: build lib/str: inputs changed");
    assert_output_contains(&out, "explain: build app/app: dependency lib/str is stale");
    assert_output_contains(&out, "arbor: ran 2 tasks, now up to date");
    let app = std::process::Command::new(space.path("dist/bin/app")).output()?;
    assert_eq!(std::str::from_utf8(&app.stdout)?, "main\nchanged\n");

    // Only the executable depends on main.c.
    space.write("src/app/main.c", "echo main2\n")?;
    let out = space.run_expect(&mut arbor_command(vec![]))?;
    assert_output_not_contains(&out, "archive lib/str");
    assert_output_contains(&out, "arbor: ran 1 tasks, now up to date");
    Ok(())
}

#[cfg(unix)]
#[test]
fn touching_a_source_is_not_a_change() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    lib_and_app(&space)?;
    space.run_expect(&mut arbor_command(vec![]))?;
    filetime::set_file_mtime(
        space.path("src/lib/str.c"),
        filetime::FileTime::from_unix_time(1_000_000_000, 0),
    )?;
    let out = space.run_expect(&mut arbor_command(vec![]))?;
    assert_eq!(std::str::from_utf8(&out.stdout)?, "arbor: no work to do\n");
    Ok(())
}

#[cfg(unix)]
#[test]
fn damaged_outputs_are_rebuilt() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    lib_and_app(&space)?;
    space.run_expect(&mut arbor_command(vec![]))?;

    space.remove("dist/bin/app")?;
    let out = space.run_expect(&mut arbor_command(vec!["-d", "explain"]))?;
    assert_output_contains(&out, "explain: build app/app: output missing");
    assert_output_contains(&out, "arbor: ran 1 tasks, now up to date");

    filetime::set_file_mtime(
        space.path("obj/lib/libstr.a"),
        filetime::FileTime::from_unix_time(1_000_000_000, 0),
    )?;
    let out = space.run_expect(&mut arbor_command(vec!["-d", "explain"]))?;
    assert_output_contains(&out, "explain: build lib/str: output modified");
    assert_output_contains(&out, "arbor: ran 2 tasks, now up to date");
    Ok(())
}

#[cfg(unix)]
#[test]
fn command_change_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    lib_and_app(&space)?;
    space.run_expect(&mut arbor_command(vec![]))?;

    space.package(
        "",
        &root_arborfile("command archive = cat $in > $out && true\ncontain lib app\n"),
    )?;
    let out = space.run_expect(&mut arbor_command(vec![]))?;
    assert_output_contains(&out, "arbor: ran 2 tasks, now up to date");
    Ok(())
}

#[cfg(unix)]
#[test]
fn damaged_db_is_recovered() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    lib_and_app(&space)?;
    space.run_expect(&mut arbor_command(vec![]))?;

    space.write(".arbor_db", "not a database")?;
    let out = space.run_expect(&mut arbor_command(vec![]))?;
    assert_output_contains(&out, "arbor: .arbor_db: unrecognized header");
    assert_output_contains(&out, "arbor: ran 2 tasks, now up to date");

    let out = space.run_expect(&mut arbor_command(vec![]))?;
    assert_eq!(std::str::from_utf8(&out.stdout)?, "arbor: no work to do\n");
    Ok(())
}
